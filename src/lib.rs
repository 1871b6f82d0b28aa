//! # Bayesian multi-sample site caller
//!
//! Given the allele observations of several samples at one genomic position,
//! this library decides whether the position is variable and which genotype
//! each sample most likely carries.
//!
//! ## Pipeline
//!
//! 1. **Genotype enumeration**: every multiset of candidate alleles of the
//!    sample's ploidy, stored once in a [`genomics::GenotypeSpace`] arena
//! 2. **Data likelihoods**: `ln P(reads | genotype)` per sample, with a read
//!    dependence factor damping correlated errors
//! 3. **Banded search**: genotype combinations near each sample's best
//!    genotypes, plus every all-homozygous combination
//! 4. **Priors**: Ewens sampling formula (or an infinite-sites neutral model
//!    for pools) times the probability of genotypes given frequencies
//! 5. **Posterior**: log-sum-exp normalization, marginals, probability of
//!    variation and the reported best combination
//!
//! ## Usage Example
//!
//! ```no_run
//! use bayescall::{CallerConfig, genomics::{InMemorySource, NullTrace, PloidyMap, SiteCaller}};
//!
//! let mut caller = SiteCaller::new(CallerConfig::default(), PloidyMap::default())?;
//! let mut source = InMemorySource::new(Vec::new());
//! let calls = caller.call_all(&mut source, &mut NullTrace)?;
//! for call in &calls {
//!     println!("{}:{} pVar={}", call.chrom, call.position + 1, call.p_var());
//! }
//! # Ok::<(), bayescall::genomics::CallerError>(())
//! ```

#![warn(missing_docs, missing_debug_implementations)]

pub mod config; // Tunables and their validation
pub mod genomics; // Allele model, inference stages and renderers

pub use config::{CallerConfig, ConfigError};
pub use genomics::{CallerError, SiteCall, SiteCaller, SiteOutcome, SkipReason};
