//! Per-sample data likelihoods `P(observations | genotype)`.

use std::fmt;
use std::sync::Arc;

use bio::stats::{PHREDProb, Prob};
use serde::Serialize;
use statrs::function::factorial::ln_factorial;

use crate::genomics::{Allele, CallerError, GenotypeId, GenotypeSpace, Sample};

/// Smallest per-observation error probability; keeps `ln e` finite.
const MIN_ERROR_PROBABILITY: f64 = 1e-12;

/// Strategy mapping an observation to the probability that it is correct.
///
/// Implementations must return values in `[0, 1]` that never decrease when
/// base or mapping quality increases.
pub trait QualityModel: fmt::Debug + Send + Sync {
    /// Probability that the observed allele is what the read really carries.
    fn confidence(&self, allele: &Allele) -> f64;
}

/// Phred-based model: product of base-call and (optionally) mapping
/// correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhredQualityModel {
    /// Include mapping quality in the per-read confidence.
    pub use_mapping_quality: bool,
}

impl Default for PhredQualityModel {
    fn default() -> Self {
        Self {
            use_mapping_quality: true,
        }
    }
}

fn phred_correctness(quality: u8) -> f64 {
    1.0 - *Prob::from(PHREDProb(f64::from(quality)))
}

impl QualityModel for PhredQualityModel {
    fn confidence(&self, allele: &Allele) -> f64 {
        let base = phred_correctness(allele.base_quality);
        let confidence = if self.use_mapping_quality {
            base * phred_correctness(allele.mapping_quality)
        } else {
            base
        };
        confidence.clamp(0.0, 1.0)
    }
}

/// Log error probability of one observation under the quality model.
pub fn ln_error_probability(model: &dyn QualityModel, allele: &Allele) -> f64 {
    let error = 1.0 - model.confidence(allele).clamp(0.0, 1.0);
    error.max(MIN_ERROR_PROBABILITY).ln()
}

/// Scale applied to the summed log error of `count` reads that the genotype
/// cannot explain. Successive reads asymptotically count for
/// `read_dependence` of an independent read.
pub fn read_dependence_scale(count: usize, read_dependence: f64) -> f64 {
    if count > 1 {
        (1.0 + (count - 1) as f64 * read_dependence) / count as f64
    } else {
        1.0
    }
}

/// `ln` of the multinomial probability of drawing `counts` from a genotype
/// whose alleles have the given copy fractions.
fn multinomial_sampling_ln(counts_and_fractions: &[(u64, f64)]) -> f64 {
    let total: u64 = counts_and_fractions.iter().map(|&(count, _)| count).sum();
    if total == 0 {
        return 0.0;
    }
    let mut ln_prob = ln_factorial(total);
    for &(count, fraction) in counts_and_fractions {
        if count > 0 {
            ln_prob += count as f64 * fraction.ln() - ln_factorial(count);
        }
    }
    ln_prob
}

/// Compute `ln P(sample observations | genotype)` for every genotype of the
/// given ploidy, in enumeration order.
///
/// Observations of alleles outside the genotype must be sequencing errors and
/// contribute their (dependence-scaled) log error probabilities; observations
/// of alleles inside the genotype follow a multinomial draw from the
/// genotype's allele fractions. Every value is `<= 0`.
pub fn estimate_likelihoods(
    sample: &Sample,
    space: &GenotypeSpace,
    ploidy: u32,
    model: &dyn QualityModel,
    read_dependence: f64,
) -> Result<Vec<(GenotypeId, f64)>, CallerError> {
    let range = space
        .ploidy_range(ploidy)
        .ok_or(CallerError::InvalidPloidy { ploidy })?;

    // (candidate index, observation count, summed ln error) per group
    let groups: Vec<(Option<usize>, u64, f64)> = sample
        .groups()
        .iter()
        .map(|group| {
            let ln_error: f64 = group
                .observations
                .iter()
                .map(|allele| ln_error_probability(model, allele))
                .sum();
            (space.index_of(&group.key), group.len() as u64, ln_error)
        })
        .collect();

    let mut likelihoods = Vec::with_capacity(range.len());
    for id in range.map(GenotypeId) {
        let genotype = space.genotype(id);
        let ploidy = f64::from(genotype.ploidy());

        let mut out_count = 0usize;
        let mut out_ln_error = 0.0;
        for &(candidate, count, ln_error) in &groups {
            if !candidate.map_or(false, |allele| genotype.contains(allele)) {
                out_count += count as usize;
                out_ln_error += ln_error;
            }
        }
        out_ln_error *= read_dependence_scale(out_count, read_dependence);

        let sampling: Vec<(u64, f64)> = genotype
            .allele_counts()
            .map(|(allele, copies)| {
                let observed = groups
                    .iter()
                    .filter(|(candidate, _, _)| *candidate == Some(allele))
                    .map(|&(_, count, _)| count)
                    .sum::<u64>();
                (observed, f64::from(copies) / ploidy)
            })
            .collect();

        let ln_likelihood = out_ln_error + multinomial_sampling_ln(&sampling);
        likelihoods.push((id, ln_likelihood.min(0.0)));
    }
    Ok(likelihoods)
}

/// One genotype's data likelihood and (once normalized) marginal posterior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenotypeLikelihood {
    /// Genotype in the site arena.
    pub genotype: GenotypeId,
    /// `ln P(observations | genotype)`.
    pub ln_likelihood: f64,
    /// Posterior probability summed over kept combinations.
    pub marginal: f64,
}

/// Per-sample genotype likelihoods and marginals at one site.
#[derive(Debug, Clone)]
pub struct SampleLikelihoods {
    /// Sample name.
    pub name: Arc<str>,
    /// Sample ploidy.
    pub ploidy: u32,
    /// Number of observations at the site.
    pub coverage: usize,
    entries: Vec<GenotypeLikelihood>,
    first_id: usize,
    positions: Vec<usize>,
}

impl SampleLikelihoods {
    /// Wrap unsorted likelihoods covering one ploidy's genotypes.
    pub fn new(
        name: impl Into<Arc<str>>,
        ploidy: u32,
        coverage: usize,
        likelihoods: Vec<(GenotypeId, f64)>,
    ) -> Self {
        let first_id = likelihoods.iter().map(|(id, _)| id.0).min().unwrap_or(0);
        let entries = likelihoods
            .into_iter()
            .map(|(genotype, ln_likelihood)| GenotypeLikelihood {
                genotype,
                ln_likelihood,
                marginal: 0.0,
            })
            .collect();
        let mut sample = Self {
            name: name.into(),
            ploidy,
            coverage,
            entries,
            first_id,
            positions: Vec::new(),
        };
        sample.reindex();
        sample
    }

    fn reindex(&mut self) {
        let span = self
            .entries
            .iter()
            .map(|entry| entry.genotype.0 - self.first_id + 1)
            .max()
            .unwrap_or(0);
        self.positions = vec![usize::MAX; span];
        for (position, entry) in self.entries.iter().enumerate() {
            self.positions[entry.genotype.0 - self.first_id] = position;
        }
    }

    fn position_of(&self, id: GenotypeId) -> Option<usize> {
        let offset = id.0.checked_sub(self.first_id)?;
        self.positions
            .get(offset)
            .copied()
            .filter(|&position| position != usize::MAX)
    }

    /// Sort by descending likelihood; equal values keep enumeration order.
    pub fn sort_by_likelihood(&mut self) {
        self.entries
            .sort_by(|a, b| b.ln_likelihood.total_cmp(&a.ln_likelihood));
        self.reindex();
    }

    /// Entries in their current order.
    pub fn likelihoods(&self) -> &[GenotypeLikelihood] {
        &self.entries
    }

    /// First entry (the best one after sorting).
    pub fn best(&self) -> Option<&GenotypeLikelihood> {
        self.entries.first()
    }

    /// Data likelihood of a genotype.
    pub fn ln_likelihood_of(&self, id: GenotypeId) -> Option<f64> {
        self.position_of(id).map(|p| self.entries[p].ln_likelihood)
    }

    /// Marginal posterior of a genotype.
    pub fn marginal_of(&self, id: GenotypeId) -> Option<f64> {
        self.position_of(id).map(|p| self.entries[p].marginal)
    }

    pub(crate) fn reset_marginals(&mut self) {
        for entry in &mut self.entries {
            entry.marginal = 0.0;
        }
    }

    pub(crate) fn add_marginal(&mut self, id: GenotypeId, probability: f64) -> bool {
        match self.position_of(id) {
            Some(position) => {
                self.entries[position].marginal += probability;
                true
            }
            None => false,
        }
    }
}
