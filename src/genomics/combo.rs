//! Joint genotype assignments across samples and the banded search that
//! proposes them.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::Serialize;

use crate::genomics::{CallerError, GenotypeId, GenotypeSpace, SampleLikelihoods};

/// One genotype per sample, aligned with the site's sample order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GenotypeCombo {
    genotypes: Vec<GenotypeId>,
}

impl GenotypeCombo {
    /// Build a combination from per-sample genotypes.
    pub fn new(genotypes: Vec<GenotypeId>) -> Self {
        Self { genotypes }
    }

    /// Genotype per sample.
    pub fn genotypes(&self) -> &[GenotypeId] {
        &self.genotypes
    }

    /// Number of samples covered.
    pub fn len(&self) -> usize {
        self.genotypes.len()
    }

    /// Whether the combination covers no sample.
    pub fn is_empty(&self) -> bool {
        self.genotypes.is_empty()
    }

    /// Every sample is homozygous for one and the same allele.
    pub fn is_homozygous(&self, space: &GenotypeSpace) -> bool {
        let mut shared = None;
        for &id in &self.genotypes {
            match (space.genotype(id).homozygous_allele(), shared) {
                (None, _) => return false,
                (Some(allele), None) => shared = Some(allele),
                (Some(allele), Some(seen)) if allele != seen => return false,
                _ => {}
            }
        }
        shared.is_some()
    }

    /// Every sample is homozygous for `allele`.
    pub fn is_homozygous_for(&self, space: &GenotypeSpace, allele: usize) -> bool {
        !self.genotypes.is_empty()
            && self
                .genotypes
                .iter()
                .all(|&id| space.genotype(id).homozygous_allele() == Some(allele))
    }

    /// Copies of each candidate allele across all samples, indexed by
    /// candidate allele.
    pub fn allele_counts(&self, space: &GenotypeSpace) -> Vec<u32> {
        let mut counts = vec![0u32; space.alleles().len()];
        for &id in &self.genotypes {
            for &allele in space.genotype(id).alleles() {
                counts[allele] += 1;
            }
        }
        counts
    }

    /// Allele frequency spectrum: frequency → number of alleles observed
    /// with exactly that many copies. Absent alleles are not counted.
    pub fn frequency_spectrum(&self, space: &GenotypeSpace) -> BTreeMap<u32, u32> {
        let mut spectrum = BTreeMap::new();
        for count in self.allele_counts(space) {
            if count > 0 {
                *spectrum.entry(count).or_insert(0) += 1;
            }
        }
        spectrum
    }

    /// Sum of per-sample data likelihoods for this assignment.
    pub fn ln_data_likelihood(&self, samples: &[SampleLikelihoods]) -> Result<f64, CallerError> {
        if samples.len() != self.genotypes.len() {
            return Err(CallerError::ComboShape {
                expected: samples.len(),
                found: self.genotypes.len(),
            });
        }
        self.genotypes
            .iter()
            .zip(samples)
            .map(|(&id, sample)| {
                sample
                    .ln_likelihood_of(id)
                    .ok_or_else(|| CallerError::MissingLikelihood {
                        sample: sample.name.to_string(),
                        genotype: id,
                    })
            })
            .sum()
    }
}

/// Limits of the banded search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandingParams {
    /// How far down its sorted list each sample may move (WB).
    pub band_width: usize,
    /// Maximum summed displacement across all samples (TB).
    pub band_depth: usize,
    /// Cap on banded combinations generated; `0` disables the cap.
    pub step_max: usize,
}

impl Default for BandingParams {
    fn default() -> Self {
        Self {
            band_width: 2,
            band_depth: 2,
            step_max: 0,
        }
    }
}

/// Propose combinations near the per-sample best genotypes, then append the
/// all-homozygous combination for every candidate allele.
///
/// `samples` must already be sorted by descending likelihood. A search state
/// is the vector of per-sample offsets into those lists; states are visited
/// breadth first starting from all zeros, so the output order is
/// deterministic and starts with the best combination.
pub fn banded_combinations(
    samples: &[SampleLikelihoods],
    space: &GenotypeSpace,
    params: &BandingParams,
) -> Result<Vec<GenotypeCombo>, CallerError> {
    if samples.is_empty() {
        return Err(CallerError::NoSamples);
    }
    if let Some(empty) = samples.iter().find(|sample| sample.likelihoods().is_empty()) {
        return Err(CallerError::MissingLikelihood {
            sample: empty.name.to_string(),
            genotype: GenotypeId(0),
        });
    }

    let widths: Vec<usize> = samples
        .iter()
        .map(|sample| sample.likelihoods().len().min(params.band_width.max(1)))
        .collect();
    let combo_at = |offsets: &[usize]| {
        GenotypeCombo::new(
            offsets
                .iter()
                .zip(samples)
                .map(|(&offset, sample)| sample.likelihoods()[offset].genotype)
                .collect(),
        )
    };

    let mut combos = Vec::new();
    let mut present = HashSet::new();
    let start = vec![0usize; samples.len()];
    let mut seen = HashSet::from([start.clone()]);
    let mut queue = VecDeque::from([start]);

    while let Some(offsets) = queue.pop_front() {
        if params.step_max > 0 && combos.len() >= params.step_max {
            break;
        }
        let combo = combo_at(&offsets);
        present.insert(combo.clone());
        combos.push(combo);

        if offsets.iter().sum::<usize>() >= params.band_depth {
            continue;
        }
        for sample in 0..offsets.len() {
            if offsets[sample] + 1 < widths[sample] {
                let mut next = offsets.clone();
                next[sample] += 1;
                if seen.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }
    }
    let banded = combos.len();

    for allele in 0..space.alleles().len() {
        let genotypes = samples
            .iter()
            .map(|sample| {
                space
                    .homozygous(sample.ploidy, allele)
                    .ok_or(CallerError::InvalidPloidy {
                        ploidy: sample.ploidy,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let combo = GenotypeCombo::new(genotypes);
        if present.insert(combo.clone()) {
            combos.push(combo);
        }
    }

    tracing::trace!(
        banded,
        homozygous_added = combos.len() - banded,
        "generated banded genotype combinations"
    );
    Ok(combos)
}
