//! Allele model, genotype arena and the per-site Bayesian inference stages.
//!
//! A site flows through the stages in this order: observations grouped per
//! sample ([`types`]), candidate genotypes ([`genotype`]), per-sample data
//! likelihoods ([`likelihood`]), banded combination search ([`combo`]),
//! priors ([`priors`]) and posterior aggregation ([`posterior`]).
//! [`SiteCaller`] drives them; [`vcf`] renders the results.

mod combo;
mod genotype;
mod likelihood;
mod posterior;
mod priors;
mod source;
mod trace;
mod types;
mod variant_caller;
pub mod vcf;

pub use combo::{banded_combinations, BandingParams, GenotypeCombo};
pub use genotype::{enumerate_genotypes, Genotype, GenotypeId, GenotypeSpace};
pub use likelihood::{
    estimate_likelihoods, ln_error_probability, read_dependence_scale, GenotypeLikelihood,
    PhredQualityModel, QualityModel, SampleLikelihoods,
};
pub use posterior::{aggregate, log_sum_exp, sort_results, truncate_results, NullHypothesis, Posterior};
pub use priors::{
    ewens_sampling_ln, genotypes_given_frequencies_ln, neutral_pooled_ln, score_combo,
    score_combos, GenotypeComboResult, PriorParams,
};
pub use source::{
    AlleleSource, InMemorySource, ObservationFileSource, PloidyMap, SiteObservations,
    SourceError, TargetRegions,
};
pub use trace::{CsvTrace, NullTrace, TraceRecord, TraceSink};
pub use types::{is_acgt, Allele, AlleleGroup, AlleleKey, AlleleType, AlleleTypes, Sample};
pub use variant_caller::{
    select_genotype_alleles, sufficient_alternate_observations, CallerError, SiteCall,
    SiteCaller, SiteOutcome, SiteStatistics, SkipReason,
};
pub use vcf::CallRenderer;
