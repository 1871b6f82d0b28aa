//! Population-genetics priors over genotype combinations.

use std::collections::BTreeMap;

use serde::Serialize;
use statrs::function::factorial::ln_factorial;

use crate::genomics::{CallerError, GenotypeCombo, GenotypeSpace, SampleLikelihoods};

/// Tunables of the combination prior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorParams {
    /// Population mutation rate θ (TH).
    pub theta: f64,
    /// Treat samples as pools drawn from one allele pool.
    pub pooled: bool,
    /// In pooled mode, `ln P(G | Af)` is divided by this value.
    pub diffusion_prior_scalar: f64,
}

impl Default for PriorParams {
    fn default() -> Self {
        Self {
            theta: 1e-3,
            pooled: false,
            diffusion_prior_scalar: 1.0,
        }
    }
}

/// A scored combination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenotypeComboResult {
    /// The assignment.
    pub combo: GenotypeCombo,
    /// Summed per-sample `ln P(data | genotype)`.
    pub ln_data_likelihood: f64,
    /// `ln P(allele frequencies)`.
    pub ln_prior_af: f64,
    /// `ln P(genotypes | allele frequencies)`.
    pub ln_prior_g_af: f64,
    /// `ln_prior_af + ln_prior_g_af`.
    pub ln_prior: f64,
    /// Unnormalized log posterior: data likelihood plus prior.
    pub score: f64,
}

/// Ewens sampling formula over an allele frequency spectrum
/// (frequency → number of alleles with that frequency).
pub fn ewens_sampling_ln(spectrum: &BTreeMap<u32, u32>, theta: f64) -> f64 {
    let copies: u32 = spectrum
        .iter()
        .map(|(&frequency, &alleles)| frequency * alleles)
        .sum();
    let rising: f64 = (0..copies).map(|i| (theta + f64::from(i)).ln()).sum();
    let classes: f64 = spectrum
        .iter()
        .map(|(&frequency, &alleles)| {
            let alleles_f = f64::from(alleles);
            alleles_f * theta.ln()
                - alleles_f * f64::from(frequency).ln()
                - ln_factorial(u64::from(alleles))
        })
        .sum();
    ln_factorial(u64::from(copies)) - rising + classes
}

/// Infinite-sites neutral prior over alternate allele copy counts, used when
/// samples are pools. Each present alternate with `m` copies contributes
/// `θ / m`; a site without alternate copies gets `1 − θ·H(n)`.
pub fn neutral_pooled_ln(counts: &[u32], reference: usize, theta: f64) -> f64 {
    let total: u32 = counts.iter().sum();
    let alternates: Vec<u32> = counts
        .iter()
        .enumerate()
        .filter(|&(allele, &count)| allele != reference && count > 0)
        .map(|(_, &count)| count)
        .collect();
    if alternates.is_empty() {
        let harmonic: f64 = (1..=total).map(|m| 1.0 / f64::from(m)).sum();
        (1.0 - theta * harmonic).max(f64::MIN_POSITIVE).ln()
    } else {
        alternates
            .iter()
            .map(|&count| theta.ln() - f64::from(count).ln())
            .sum()
    }
}

fn multinomial_coefficient_ln(counts: impl IntoIterator<Item = u32>) -> f64 {
    let mut total = 0u64;
    let mut denominator = 0.0;
    for count in counts {
        total += u64::from(count);
        denominator += ln_factorial(u64::from(count));
    }
    ln_factorial(total) - denominator
}

/// Probability of the specific per-sample assignment among all assignments
/// that produce the same allele counts.
pub fn genotypes_given_frequencies_ln(combo: &GenotypeCombo, space: &GenotypeSpace) -> f64 {
    let per_sample: f64 = combo
        .genotypes()
        .iter()
        .map(|&id| {
            multinomial_coefficient_ln(space.genotype(id).allele_counts().map(|(_, c)| c))
        })
        .sum();
    per_sample - multinomial_coefficient_ln(combo.allele_counts(space))
}

/// Score one combination.
pub fn score_combo(
    combo: GenotypeCombo,
    samples: &[SampleLikelihoods],
    space: &GenotypeSpace,
    params: &PriorParams,
) -> Result<GenotypeComboResult, CallerError> {
    let ln_data_likelihood = combo.ln_data_likelihood(samples)?;
    let mut ln_prior_g_af = genotypes_given_frequencies_ln(&combo, space);
    let ln_prior_af = if params.pooled {
        ln_prior_g_af /= params.diffusion_prior_scalar;
        neutral_pooled_ln(
            &combo.allele_counts(space),
            GenotypeSpace::REFERENCE,
            params.theta,
        )
    } else {
        ewens_sampling_ln(&combo.frequency_spectrum(space), params.theta)
    };
    let ln_prior = ln_prior_af + ln_prior_g_af;
    Ok(GenotypeComboResult {
        combo,
        ln_data_likelihood,
        ln_prior_af,
        ln_prior_g_af,
        ln_prior,
        score: ln_data_likelihood + ln_prior,
    })
}

/// Score every combination; the output has one result per input, in input
/// order.
pub fn score_combos(
    combos: Vec<GenotypeCombo>,
    samples: &[SampleLikelihoods],
    space: &GenotypeSpace,
    params: &PriorParams,
) -> Result<Vec<GenotypeComboResult>, CallerError> {
    combos
        .into_iter()
        .map(|combo| score_combo(combo, samples, space, params))
        .collect()
}
