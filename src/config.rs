//! Tunables of the site caller.

use thiserror::Error;

use crate::genomics::{AlleleType, AlleleTypes, BandingParams, NullHypothesis, PriorParams};

/// Errors raised when validating a [`CallerConfig`].
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A tunable is outside its admissible range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Configuration of the per-site inference.
#[derive(Debug, Clone, PartialEq)]
pub struct CallerConfig {
    /// Minimum observations of an alternate allele in one sample.
    pub min_alt_count: u32,
    /// Minimum fraction of a sample's observations supporting an alternate.
    pub min_alt_fraction: f64,
    /// Allele types admitted as genotype candidates.
    pub allowed_types: AlleleTypes,
    /// A candidate needs one supporting observation at or above this base
    /// quality.
    pub min_base_quality: u8,
    /// A candidate needs one supporting observation at or above this mapping
    /// quality.
    pub min_mapping_quality: u8,
    /// Per-sample band width (WB); `0` behaves like `1`.
    pub band_width: usize,
    /// Total band depth across samples (TB).
    pub band_depth: usize,
    /// Cap on banded combinations; `0` disables the cap.
    pub step_max: usize,
    /// Population mutation rate θ (TH).
    pub theta: f64,
    /// Samples are pools.
    pub pooled: bool,
    /// Pooled-mode divisor of `ln P(G | Af)`.
    pub diffusion_prior_scalar: f64,
    /// Posterior integration depth K; `0` keeps every combination.
    pub posterior_integration_depth: usize,
    /// Report sites with pVar at or above this value (PVL).
    pub pvar_threshold: f64,
    /// Read dependence factor (RDF) in `[0, 1]`.
    pub read_dependence_factor: f64,
    /// Include mapping quality in per-read confidence.
    pub use_mapping_quality: bool,
    /// Combinations counted as "no variation".
    pub null_hypothesis: NullHypothesis,
    /// Emit one VCF record per alternate of the best combination.
    pub report_all_alternates: bool,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            min_alt_count: 1,
            min_alt_fraction: 0.0,
            allowed_types: AlleleTypes::default(),
            min_base_quality: 0,
            min_mapping_quality: 0,
            band_width: 2,
            band_depth: 2,
            step_max: 0,
            theta: 1e-3,
            pooled: false,
            diffusion_prior_scalar: 1.0,
            posterior_integration_depth: 0,
            pvar_threshold: 1e-4,
            read_dependence_factor: 0.9,
            use_mapping_quality: true,
            null_hypothesis: NullHypothesis::Monomorphic,
            report_all_alternates: false,
        }
    }
}

impl CallerConfig {
    /// Set the alternate support thresholds.
    pub fn with_alternate_support(mut self, min_count: u32, min_fraction: f64) -> Self {
        self.min_alt_count = min_count;
        self.min_alt_fraction = min_fraction;
        self
    }

    /// Admit an additional allele type.
    pub fn allowing(mut self, allele_type: AlleleType) -> Self {
        self.allowed_types = self.allowed_types.with(allele_type);
        self
    }

    /// Set the banding limits (WB, TB, step cap).
    pub fn with_banding(mut self, band_width: usize, band_depth: usize, step_max: usize) -> Self {
        self.band_width = band_width;
        self.band_depth = band_depth;
        self.step_max = step_max;
        self
    }

    /// Set θ.
    pub fn with_theta(mut self, theta: f64) -> Self {
        self.theta = theta;
        self
    }

    /// Enable pooled mode with the given diffusion prior scalar.
    pub fn with_pooled(mut self, diffusion_prior_scalar: f64) -> Self {
        self.pooled = true;
        self.diffusion_prior_scalar = diffusion_prior_scalar;
        self
    }

    /// Set the posterior integration depth K.
    pub fn with_integration_depth(mut self, depth: usize) -> Self {
        self.posterior_integration_depth = depth;
        self
    }

    /// Set the reporting threshold PVL.
    pub fn with_pvar_threshold(mut self, threshold: f64) -> Self {
        self.pvar_threshold = threshold;
        self
    }

    /// Set the read dependence factor.
    pub fn with_read_dependence(mut self, factor: f64) -> Self {
        self.read_dependence_factor = factor;
        self
    }

    /// Choose the null hypothesis for pVar.
    pub fn with_null_hypothesis(mut self, null: NullHypothesis) -> Self {
        self.null_hypothesis = null;
        self
    }

    /// Banding limits as consumed by the combination search.
    pub fn banding(&self) -> BandingParams {
        BandingParams {
            band_width: self.band_width,
            band_depth: self.band_depth,
            step_max: self.step_max,
        }
    }

    /// Prior tunables as consumed by the prior model.
    pub fn priors(&self) -> PriorParams {
        PriorParams {
            theta: self.theta,
            pooled: self.pooled,
            diffusion_prior_scalar: self.diffusion_prior_scalar,
        }
    }

    /// Check every tunable's range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_alt_fraction) {
            return Err(ConfigError::invalid("min_alt_fraction", "must lie in [0, 1]"));
        }
        if !(self.theta > 0.0 && self.theta.is_finite()) {
            return Err(ConfigError::invalid("theta", "must be a positive finite number"));
        }
        if !(self.diffusion_prior_scalar > 0.0 && self.diffusion_prior_scalar.is_finite()) {
            return Err(ConfigError::invalid(
                "diffusion_prior_scalar",
                "must be a positive finite number",
            ));
        }
        if !(0.0..=1.0).contains(&self.pvar_threshold) {
            return Err(ConfigError::invalid("pvar_threshold", "must lie in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.read_dependence_factor) {
            return Err(ConfigError::invalid("read_dependence_factor", "must lie in [0, 1]"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CallerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.banding(), BandingParams::default());
        assert_eq!(config.priors(), PriorParams::default());
    }

    #[test]
    fn builders_compose() {
        let config = CallerConfig::default()
            .with_banding(3, 5, 100)
            .with_pooled(2.0)
            .allowing(AlleleType::Insertion)
            .with_integration_depth(50);
        assert_eq!(config.banding().band_depth, 5);
        assert!(config.priors().pooled);
        assert!(config.allowed_types.contains(AlleleType::Insertion));
        assert_eq!(config.posterior_integration_depth, 50);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = CallerConfig::default().with_theta(0.0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "theta", .. }));
        assert!(CallerConfig::default()
            .with_read_dependence(1.5)
            .validate()
            .is_err());
        assert!(CallerConfig::default()
            .with_alternate_support(1, -0.1)
            .validate()
            .is_err());
        assert!(CallerConfig::default()
            .with_pooled(0.0)
            .validate()
            .is_err());
        assert!(CallerConfig::default()
            .with_banding(0, 0, 0)
            .validate()
            .is_ok());
    }
}
