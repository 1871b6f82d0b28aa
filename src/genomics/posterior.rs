//! Posterior normalization, marginals, probability of variation and best
//! combination selection.

use bio::stats::LogProb;
use serde::Serialize;

use crate::genomics::{CallerError, GenotypeComboResult, GenotypeSpace, SampleLikelihoods};

/// Which combinations count as "no variation" when computing pVar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NullHypothesis {
    /// Every sample homozygous for one shared allele (any allele).
    #[default]
    Monomorphic,
    /// Every sample homozygous for the reference allele.
    HomozygousReference,
}

/// Numerically stable `ln Σ exp(v)`.
///
/// Empty input, NaN values or an all `-inf` input have no meaningful
/// normalizer and are reported as [`CallerError::DegenerateNormalizer`].
pub fn log_sum_exp(values: &[f64]) -> Result<f64, CallerError> {
    let degenerate = || CallerError::DegenerateNormalizer {
        count: values.len(),
    };
    if values.iter().any(|v| v.is_nan()) {
        return Err(degenerate());
    }
    let probs: Vec<LogProb> = values.iter().map(|&v| LogProb(v)).collect();
    let total = *LogProb::ln_sum_exp(&probs);
    if total.is_finite() {
        Ok(total)
    } else {
        Err(degenerate())
    }
}

/// Stable sort by descending score.
pub fn sort_results(results: &mut [GenotypeComboResult]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// Keep at most `depth` results (when `depth > 0`), never dropping a
/// homozygous combination: homozygous results removed from the tail are set
/// aside and re-admitted, then everything is re-sorted. The result count may
/// therefore exceed `depth`.
pub fn truncate_results(
    results: &mut Vec<GenotypeComboResult>,
    depth: usize,
    space: &GenotypeSpace,
) {
    if depth == 0 || results.len() <= depth {
        return;
    }
    let mut readmitted = Vec::new();
    while results.len() + readmitted.len() > depth {
        match results.pop() {
            Some(result) if result.combo.is_homozygous(space) => readmitted.push(result),
            Some(_) => {}
            None => break,
        }
    }
    // popped bottom-up; restore ascending rank order before the stable sort
    readmitted.reverse();
    results.extend(readmitted);
    sort_results(results);
}

/// Outcome of posterior aggregation at one site.
#[derive(Debug, Clone, Serialize)]
pub struct Posterior {
    /// Kept results, sorted by descending score.
    pub results: Vec<GenotypeComboResult>,
    /// `ln` of the posterior normalizer.
    pub ln_normalizer: f64,
    /// Probability that the site is variable.
    pub p_var: f64,
    /// Index into `results` of the reported combination.
    pub best: usize,
}

impl Posterior {
    /// The reported combination.
    pub fn best(&self) -> &GenotypeComboResult {
        &self.results[self.best]
    }

    /// Normalized posterior of the result at `index`.
    pub fn posterior_of(&self, index: usize) -> f64 {
        (self.results[index].score - self.ln_normalizer).exp()
    }
}

fn is_null(result: &GenotypeComboResult, space: &GenotypeSpace, null: NullHypothesis) -> bool {
    match null {
        NullHypothesis::Monomorphic => result.combo.is_homozygous(space),
        NullHypothesis::HomozygousReference => result
            .combo
            .is_homozygous_for(space, GenotypeSpace::REFERENCE),
    }
}

/// Sort, truncate, normalize, fill per-sample marginals, compute pVar and
/// pick the best combination (first non-homozygous one, else the top one).
pub fn aggregate(
    mut results: Vec<GenotypeComboResult>,
    samples: &mut [SampleLikelihoods],
    space: &GenotypeSpace,
    integration_depth: usize,
    null: NullHypothesis,
) -> Result<Posterior, CallerError> {
    sort_results(&mut results);
    truncate_results(&mut results, integration_depth, space);
    if results.is_empty() {
        return Err(CallerError::EmptyCombinationSet);
    }

    let scores: Vec<f64> = results.iter().map(|result| result.score).collect();
    let ln_normalizer = log_sum_exp(&scores)?;

    for sample in samples.iter_mut() {
        sample.reset_marginals();
    }
    let mut null_mass = 0.0;
    for result in &results {
        let posterior = (result.score - ln_normalizer).exp();
        for (sample, &id) in samples.iter_mut().zip(result.combo.genotypes()) {
            if !sample.add_marginal(id, posterior) {
                return Err(CallerError::MissingLikelihood {
                    sample: sample.name.to_string(),
                    genotype: id,
                });
            }
        }
        if is_null(result, space, null) {
            null_mass += posterior;
        }
    }
    let p_var = (1.0 - null_mass).clamp(0.0, 1.0);

    let best = results
        .iter()
        .position(|result| !result.combo.is_homozygous(space))
        .unwrap_or(0);

    Ok(Posterior {
        results,
        ln_normalizer,
        p_var,
        best,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{AlleleKey, AlleleType, GenotypeCombo, GenotypeId};

    fn space() -> GenotypeSpace {
        GenotypeSpace::build(
            vec![
                AlleleKey::reference(b'A'),
                AlleleKey::new(AlleleType::Snp, b"T".to_vec(), 1),
            ],
            [2],
        )
        .unwrap()
    }

    fn result(genotypes: &[usize], score: f64) -> GenotypeComboResult {
        GenotypeComboResult {
            combo: GenotypeCombo::new(genotypes.iter().copied().map(GenotypeId).collect()),
            ln_data_likelihood: score,
            ln_prior_af: 0.0,
            ln_prior_g_af: 0.0,
            ln_prior: 0.0,
            score,
        }
    }

    #[test]
    fn log_sum_exp_of_equal_values_adds_log_count() {
        let total = log_sum_exp(&[-3.0; 4]).unwrap();
        assert!((total - (-3.0 + 4f64.ln())).abs() < 1e-12);
    }

    #[test]
    fn log_sum_exp_handles_widely_spread_values() {
        let total = log_sum_exp(&[-1000.0, -1.0, f64::NEG_INFINITY]).unwrap();
        assert!((total - -1.0).abs() < 1e-12);
    }

    #[test]
    fn log_sum_exp_rejects_degenerate_input() {
        assert!(matches!(
            log_sum_exp(&[]),
            Err(CallerError::DegenerateNormalizer { count: 0 })
        ));
        assert!(log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]).is_err());
        assert!(log_sum_exp(&[0.0, f64::NAN]).is_err());
    }

    #[test]
    fn truncation_readmits_homozygous_combos() {
        let space = space();
        // AA and TT score worst; K = 1 is smaller than the homozygous count
        let mut results = vec![
            result(&[1, 1], -1.0),
            result(&[1, 0], -2.0),
            result(&[0, 0], -5.0),
            result(&[2, 2], -6.0),
        ];
        truncate_results(&mut results, 1, &space);
        let scores: Vec<f64> = results.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![-5.0, -6.0]);
        assert!(results.iter().all(|r| r.combo.is_homozygous(&space)));
    }

    #[test]
    fn truncation_keeps_top_results_when_room_allows() {
        let space = space();
        let mut results = vec![
            result(&[1, 1], -1.0),
            result(&[0, 0], -2.0),
            result(&[1, 0], -3.0),
            result(&[0, 1], -4.0),
            result(&[2, 2], -9.0),
        ];
        truncate_results(&mut results, 3, &space);
        let scores: Vec<f64> = results.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![-1.0, -2.0, -9.0]);
    }

    #[test]
    fn uniform_single_sample_posterior() {
        let space = space();
        let likelihoods = space.ids_for_ploidy(2).map(|id| (id, -2.0)).collect();
        let mut samples = vec![SampleLikelihoods::new("s", 2, 6, likelihoods)];
        let results = vec![result(&[0], -2.0), result(&[1], -2.0), result(&[2], -2.0)];

        let posterior = aggregate(
            results.clone(),
            &mut samples,
            &space,
            0,
            NullHypothesis::Monomorphic,
        )
        .unwrap();
        for entry in samples[0].likelihoods() {
            assert!((entry.marginal - 1.0 / 3.0).abs() < 1e-12);
        }
        assert!((posterior.p_var - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(posterior.best().combo.genotypes(), &[GenotypeId(1)]);

        let posterior = aggregate(
            results,
            &mut samples,
            &space,
            0,
            NullHypothesis::HomozygousReference,
        )
        .unwrap();
        assert!((posterior.p_var - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn best_falls_back_to_top_homozygous_combo() {
        let space = space();
        let likelihoods = space.ids_for_ploidy(2).map(|id| (id, -1.0)).collect();
        let mut samples = vec![SampleLikelihoods::new("s", 2, 6, likelihoods)];
        let results = vec![result(&[0], -4.0), result(&[2], -1.0)];
        let posterior =
            aggregate(results, &mut samples, &space, 0, NullHypothesis::Monomorphic).unwrap();
        assert_eq!(posterior.best().combo.genotypes(), &[GenotypeId(2)]);
        assert!(posterior.p_var < 1e-12);
    }

    #[test]
    fn empty_result_set_is_an_error() {
        let space = space();
        let mut samples = Vec::new();
        assert!(matches!(
            aggregate(Vec::new(), &mut samples, &space, 0, NullHypothesis::Monomorphic),
            Err(CallerError::EmptyCombinationSet)
        ));
    }
}
