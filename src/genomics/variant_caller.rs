use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::config::{CallerConfig, ConfigError};
use crate::genomics::{
    aggregate, banded_combinations, estimate_likelihoods, ewens_sampling_ln, is_acgt,
    score_combos, AlleleKey, AlleleSource, AlleleType, GenotypeCombo, GenotypeComboResult,
    GenotypeId, GenotypeSpace, PhredQualityModel, PloidyMap, Posterior, QualityModel,
    SampleLikelihoods, SiteObservations, SourceError, TraceRecord, TraceSink,
};

/// Errors originating from site inference.
#[derive(Debug, Error)]
pub enum CallerError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A sample was assigned a ploidy no genotype can have.
    #[error("invalid ploidy {ploidy}")]
    InvalidPloidy {
        /// Offending ploidy.
        ploidy: u32,
    },

    /// Genotype enumeration was requested without candidate alleles.
    #[error("no candidate alleles to build genotypes from")]
    EmptyAlleleSet,

    /// No sample carries data at the site.
    #[error("no samples to genotype")]
    NoSamples,

    /// A combination does not cover exactly the site's samples.
    #[error("combination covers {found} samples, expected {expected}")]
    ComboShape {
        /// Samples at the site.
        expected: usize,
        /// Entries in the combination.
        found: usize,
    },

    /// A genotype has no likelihood for the sample it was assigned to.
    #[error("sample {sample} has no likelihood for genotype {genotype:?}")]
    MissingLikelihood {
        /// Sample name.
        sample: String,
        /// Genotype without likelihood.
        genotype: GenotypeId,
    },

    /// Nothing was left to normalize.
    #[error("no genotype combinations survived to normalization")]
    EmptyCombinationSet,

    /// The posterior normalizer is undefined (no finite score).
    #[error("posterior normalizer undefined over {count} scores")]
    DegenerateNormalizer {
        /// Number of scores handed to log-sum-exp.
        count: usize,
    },

    /// Writing trace records failed.
    #[error("trace output failed: {0}")]
    Trace(#[from] io::Error),

    /// The allele source failed.
    #[error("allele source failed: {0}")]
    Source(#[from] SourceError),

    /// Inference failed at a specific position.
    #[error("{chrom}:{position}: {source}")]
    Site {
        /// Contig name.
        chrom: Arc<str>,
        /// 1-based position.
        position: u64,
        /// Underlying failure.
        #[source]
        source: Box<CallerError>,
    },
}

/// Why a position was passed over before inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Reference base is not A, C, G or T.
    NonAcgtReference,
    /// Position lies outside the targets.
    OutsideTargets,
    /// No observations at all.
    NoCoverage,
    /// No sample meets the alternate count and fraction thresholds.
    InsufficientAlternateObservations,
    /// Fewer than two candidate alleles survived filtering.
    TooFewGenotypeAlleles,
}

/// Aggregate counters over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SiteStatistics {
    /// Positions offered to the caller.
    pub total_sites: u64,
    /// Positions that went through full inference.
    pub processed_sites: u64,
    /// Skipped positions per reason.
    pub skipped: BTreeMap<SkipReason, u64>,
}

impl SiteStatistics {
    /// Fraction of offered positions that were processed.
    pub fn processed_ratio(&self) -> f64 {
        if self.total_sites == 0 {
            0.0
        } else {
            self.processed_sites as f64 / self.total_sites as f64
        }
    }

    fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_insert(0) += 1;
    }
}

/// Full inference result for one position.
#[derive(Debug, Clone)]
pub struct SiteCall {
    /// Contig name.
    pub chrom: Arc<str>,
    /// 0-based position.
    pub position: u32,
    /// Reference base.
    pub reference_base: u8,
    /// Candidate alleles and enumerated genotypes.
    pub space: GenotypeSpace,
    /// Per-sample sorted likelihoods with marginals, in combination order.
    pub samples: Vec<SampleLikelihoods>,
    /// Kept scored combinations, normalizer, pVar and best index.
    pub posterior: Posterior,
    /// Number of combinations produced by the banded search.
    pub combos_tested: usize,
    /// Observations across samples.
    pub coverage: usize,
    /// Ewens sampling probability of the best combination.
    pub best_ewens_probability: f64,
}

impl SiteCall {
    /// The reported scored combination.
    pub fn best(&self) -> &GenotypeComboResult {
        self.posterior.best()
    }

    /// The reported combination.
    pub fn best_combo(&self) -> &GenotypeCombo {
        &self.best().combo
    }

    /// Score of the reported combination.
    pub fn best_score(&self) -> f64 {
        self.best().score
    }

    /// Probability of variation.
    pub fn p_var(&self) -> f64 {
        self.posterior.p_var
    }

    /// Posterior normalizer in probability space.
    pub fn posterior_normalizer(&self) -> f64 {
        self.posterior.ln_normalizer.exp()
    }

    /// Candidate alleles; index 0 is the reference.
    pub fn genotype_alleles(&self) -> &[AlleleKey] {
        self.space.alleles()
    }

    /// Alternate alleles present in the best combination with their copy
    /// numbers, most frequent first (ties by candidate order).
    pub fn alternates(&self) -> Vec<(usize, u32)> {
        let mut alternates: Vec<(usize, u32)> = self
            .best_combo()
            .allele_counts(&self.space)
            .into_iter()
            .enumerate()
            .filter(|&(allele, count)| allele != GenotypeSpace::REFERENCE && count > 0)
            .collect();
        alternates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        alternates
    }

    /// Results of the named sample, if it had data.
    pub fn sample(&self, name: &str) -> Option<&SampleLikelihoods> {
        self.samples.iter().find(|sample| sample.name.as_ref() == name)
    }

    /// Genotype assigned to the named sample by the best combination.
    pub fn best_genotype_of(&self, name: &str) -> Option<GenotypeId> {
        let index = self
            .samples
            .iter()
            .position(|sample| sample.name.as_ref() == name)?;
        self.best_combo().genotypes().get(index).copied()
    }
}

/// Result of offering one position to the caller.
#[derive(Debug, Clone)]
pub enum SiteOutcome {
    /// Full inference ran.
    Called(Box<SiteCall>),
    /// The position was passed over.
    Skipped(SkipReason),
}

impl SiteOutcome {
    /// The call, if inference ran.
    pub fn call(&self) -> Option<&SiteCall> {
        match self {
            SiteOutcome::Called(call) => Some(call),
            SiteOutcome::Skipped(_) => None,
        }
    }

    /// Consume into the call, if inference ran.
    pub fn into_call(self) -> Option<SiteCall> {
        match self {
            SiteOutcome::Called(call) => Some(*call),
            SiteOutcome::Skipped(_) => None,
        }
    }
}

/// Whether any sample has an allowed alternate allele meeting both the count
/// and fraction thresholds.
pub fn sufficient_alternate_observations(site: &SiteObservations, config: &CallerConfig) -> bool {
    site.samples.iter().any(|sample| {
        let total = sample.observation_count();
        total > 0
            && sample.groups().iter().any(|group| {
                let key = &group.key;
                key.allele_type != AlleleType::Reference
                    && config.allowed_types.contains(key.allele_type)
                    && group.len() >= config.min_alt_count as usize
                    && group.len() as f64 / total as f64 >= config.min_alt_fraction
            })
    })
}

/// Candidate alleles: the reference first, then every allowed alternate key
/// with at least one observation passing the quality floors, in key order.
pub fn select_genotype_alleles(site: &SiteObservations, config: &CallerConfig) -> Vec<AlleleKey> {
    let mut alternates = BTreeSet::new();
    for group in site.samples.iter().flat_map(|sample| sample.groups()) {
        let key = &group.key;
        if key.is_reference() || !config.allowed_types.contains(key.allele_type) {
            continue;
        }
        let supported = group.observations.iter().any(|allele| {
            allele.base_quality >= config.min_base_quality
                && allele.mapping_quality >= config.min_mapping_quality
        });
        if supported {
            alternates.insert(key.clone());
        }
    }
    std::iter::once(AlleleKey::reference(site.reference_base))
        .chain(alternates)
        .collect()
}

/// Per-position Bayesian caller.
#[derive(Debug)]
pub struct SiteCaller {
    config: CallerConfig,
    ploidy: PloidyMap,
    quality_model: Box<dyn QualityModel>,
    statistics: SiteStatistics,
}

impl SiteCaller {
    /// Create a caller after validating the configuration.
    pub fn new(config: CallerConfig, ploidy: PloidyMap) -> Result<Self, CallerError> {
        config.validate()?;
        let quality_model = Box::new(PhredQualityModel {
            use_mapping_quality: config.use_mapping_quality,
        });
        Ok(Self {
            config,
            ploidy,
            quality_model,
            statistics: SiteStatistics::default(),
        })
    }

    /// Replace the per-read quality model.
    pub fn with_quality_model(mut self, model: impl QualityModel + 'static) -> Self {
        self.quality_model = Box::new(model);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &CallerConfig {
        &self.config
    }

    /// Counters accumulated so far.
    pub fn statistics(&self) -> &SiteStatistics {
        &self.statistics
    }

    /// Run inference at one position, or report why it was skipped.
    ///
    /// Failures are wrapped in [`CallerError::Site`] carrying the position.
    /// Trace records list the samples present at the site.
    pub fn call_site(
        &mut self,
        site: &SiteObservations,
        trace: &mut dyn TraceSink,
    ) -> Result<SiteOutcome, CallerError> {
        let names: Vec<Arc<str>> = site.samples.iter().map(|s| Arc::clone(&s.name)).collect();
        self.call_site_with_samples(site, &names, trace)
    }

    /// Like [`SiteCaller::call_site`], with trace records laid out over the
    /// full `sample_names` list; samples without data show as `?`.
    pub fn call_site_with_samples(
        &mut self,
        site: &SiteObservations,
        sample_names: &[Arc<str>],
        trace: &mut dyn TraceSink,
    ) -> Result<SiteOutcome, CallerError> {
        self.statistics.total_sites += 1;
        let outcome = self.infer(site, sample_names, trace).map_err(|err| CallerError::Site {
            chrom: Arc::clone(&site.chrom),
            position: u64::from(site.position) + 1,
            source: Box::new(err),
        })?;
        match &outcome {
            SiteOutcome::Called(_) => self.statistics.processed_sites += 1,
            SiteOutcome::Skipped(reason) => self.statistics.skip(*reason),
        }
        Ok(outcome)
    }

    /// Drain a source, returning every called site in source order.
    pub fn call_all<S: AlleleSource>(
        &mut self,
        source: &mut S,
        trace: &mut dyn TraceSink,
    ) -> Result<Vec<SiteCall>, CallerError> {
        let mut calls = Vec::new();
        while let Some(site) = source.next_site()? {
            let outcome = self.call_site_with_samples(&site, source.sample_names(), trace)?;
            if let Some(call) = outcome.into_call() {
                calls.push(call);
            }
        }
        Ok(calls)
    }

    /// Log the run counters.
    pub fn log_summary(&self) {
        let stats = &self.statistics;
        info!(
            total_sites = stats.total_sites,
            processed_sites = stats.processed_sites,
            ratio = stats.processed_ratio(),
            "site statistics"
        );
        for (reason, count) in &stats.skipped {
            debug!(?reason, count, "skipped sites");
        }
    }

    fn infer(
        &self,
        site: &SiteObservations,
        sample_names: &[Arc<str>],
        trace: &mut dyn TraceSink,
    ) -> Result<SiteOutcome, CallerError> {
        let chrom = site.chrom.as_ref();
        let pos = u64::from(site.position) + 1;

        if !is_acgt(site.reference_base) {
            trace!(chrom, pos, "reference base is not A/C/G/T");
            return Ok(SiteOutcome::Skipped(SkipReason::NonAcgtReference));
        }

        if trace.enabled() {
            for sample in &site.samples {
                for allele in sample.observations() {
                    trace.record(
                        chrom,
                        site.position,
                        TraceRecord::Allele {
                            sample: &sample.name,
                            allele,
                        },
                    )?;
                }
            }
        }

        if !site.in_target {
            debug!(chrom, pos, "position is not inside any targets, skipping");
            return Ok(SiteOutcome::Skipped(SkipReason::OutsideTargets));
        }

        let coverage = site.coverage();
        debug!(chrom, pos, coverage, "position");
        if coverage == 0 {
            debug!(chrom, pos, "no alleles left at this site after filtering");
            return Ok(SiteOutcome::Skipped(SkipReason::NoCoverage));
        }

        if !sufficient_alternate_observations(site, &self.config) {
            debug!(chrom, pos, "insufficient alternate observations");
            return Ok(SiteOutcome::Skipped(
                SkipReason::InsufficientAlternateObservations,
            ));
        }

        let genotype_alleles = select_genotype_alleles(site, &self.config);
        if genotype_alleles.len() <= 1 {
            trace!(chrom, pos, "no alternate genotype alleles passed filters");
            return Ok(SiteOutcome::Skipped(SkipReason::TooFewGenotypeAlleles));
        }

        let with_data: Vec<_> = site
            .samples
            .iter()
            .filter(|sample| sample.observation_count() > 0)
            .collect();
        if with_data.is_empty() {
            return Err(CallerError::NoSamples);
        }
        let ploidies: Vec<u32> = with_data
            .iter()
            .map(|sample| self.ploidy.ploidy_of(&sample.name))
            .collect();
        let space = GenotypeSpace::build(genotype_alleles, ploidies.iter().copied())?;

        let mut samples = Vec::with_capacity(with_data.len());
        for (sample, &ploidy) in with_data.iter().zip(&ploidies) {
            let likelihoods = estimate_likelihoods(
                sample,
                &space,
                ploidy,
                self.quality_model.as_ref(),
                self.config.read_dependence_factor,
            )?;
            if trace.enabled() {
                for &(id, ln_likelihood) in &likelihoods {
                    trace.record(
                        chrom,
                        site.position,
                        TraceRecord::Likelihood {
                            sample: &sample.name,
                            genotype: space.label(id),
                            ln_likelihood,
                        },
                    )?;
                }
            }
            let mut result = SampleLikelihoods::new(
                Arc::clone(&sample.name),
                ploidy,
                sample.observation_count(),
                likelihoods,
            );
            result.sort_by_likelihood();
            samples.push(result);
        }
        trace!(chrom, pos, "finished calculating data likelihoods");

        if trace.enabled() {
            let names = sample_names.iter().map(AsRef::as_ref).collect();
            trace.record(chrom, site.position, TraceRecord::Samples { names })?;
        }

        let combos = banded_combinations(&samples, &space, &self.config.banding())?;
        let combos_tested = combos.len();
        let results = score_combos(combos, &samples, &space, &self.config.priors())?;
        let posterior = aggregate(
            results,
            &mut samples,
            &space,
            self.config.posterior_integration_depth,
            self.config.null_hypothesis,
        )?;
        trace!(chrom, pos, p_var = posterior.p_var, "computed posterior");

        if trace.enabled() {
            // combo slot of each listed sample, `None` when it has no data here
            let slots: Vec<Option<usize>> = sample_names
                .iter()
                .map(|name| samples.iter().position(|s| s.name == *name))
                .collect();
            trace.record(
                chrom,
                site.position,
                TraceRecord::Normalizer {
                    ln_normalizer: posterior.ln_normalizer,
                },
            )?;
            for (index, result) in posterior.results.iter().enumerate() {
                let genotypes = result.combo.genotypes();
                let genotypes = slots
                    .iter()
                    .map(|slot| match slot {
                        Some(index) => space.label(genotypes[*index]),
                        None => "?".to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("|");
                trace.record(
                    chrom,
                    site.position,
                    TraceRecord::Combo {
                        genotypes,
                        ln_data_likelihood: result.ln_data_likelihood,
                        ln_prior: result.ln_prior,
                        ln_prior_g_af: result.ln_prior_g_af,
                        ln_prior_af: result.ln_prior_af,
                        score: result.score,
                        posterior: posterior.posterior_of(index),
                    },
                )?;
            }
        }

        let best_ewens_probability = ewens_sampling_ln(
            &posterior.best().combo.frequency_spectrum(&space),
            self.config.theta,
        )
        .exp();

        Ok(SiteOutcome::Called(Box::new(SiteCall {
            chrom: Arc::clone(&site.chrom),
            position: site.position,
            reference_base: site.reference_base.to_ascii_uppercase(),
            space,
            samples,
            posterior,
            combos_tested,
            coverage,
            best_ewens_probability,
        })))
    }
}
