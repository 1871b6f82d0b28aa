use std::collections::BTreeMap;
use std::ops::Range;

use itertools::Itertools;
use serde::Serialize;

use crate::genomics::{AlleleKey, CallerError};

/// Index of a genotype inside a [`GenotypeSpace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GenotypeId(pub usize);

/// Unordered multiset of candidate alleles, one entry per genome copy.
///
/// Entries are candidate-allele indices kept in ascending order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Genotype {
    alleles: Vec<usize>,
}

impl Genotype {
    /// Build a genotype from allele indices (any order).
    pub fn new(mut alleles: Vec<usize>) -> Self {
        alleles.sort_unstable();
        Self { alleles }
    }

    /// Number of genome copies.
    pub fn ploidy(&self) -> u32 {
        self.alleles.len() as u32
    }

    /// Allele index per copy, ascending.
    pub fn alleles(&self) -> &[usize] {
        &self.alleles
    }

    /// Whether every copy carries the same allele.
    pub fn is_homozygous(&self) -> bool {
        self.alleles.windows(2).all(|pair| pair[0] == pair[1])
    }

    /// The allele carried by every copy, if homozygous.
    pub fn homozygous_allele(&self) -> Option<usize> {
        if self.is_homozygous() {
            self.alleles.first().copied()
        } else {
            None
        }
    }

    /// Whether any copy carries the allele.
    pub fn contains(&self, allele: usize) -> bool {
        self.alleles.binary_search(&allele).is_ok()
    }

    /// Distinct alleles with their copy numbers, ascending by allele.
    pub fn allele_counts(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.alleles
            .iter()
            .dedup_with_count()
            .map(|(count, &allele)| (allele, count as u32))
    }
}

/// All multiset selections of `ploidy` alleles out of `allele_count`
/// candidates, in lexicographic order of allele indices.
pub fn enumerate_genotypes(ploidy: u32, allele_count: usize) -> Vec<Genotype> {
    if ploidy == 0 || allele_count == 0 {
        return Vec::new();
    }
    (0..allele_count)
        .combinations_with_replacement(ploidy as usize)
        .map(|alleles| Genotype { alleles })
        .collect()
}

/// Per-site arena holding the candidate alleles and every enumerated
/// genotype, grouped by ploidy.
///
/// The reference allele is always candidate index 0.
#[derive(Debug, Clone)]
pub struct GenotypeSpace {
    alleles: Vec<AlleleKey>,
    genotypes: Vec<Genotype>,
    by_ploidy: BTreeMap<u32, Range<usize>>,
}

impl GenotypeSpace {
    /// Index of the reference allele among the candidates.
    pub const REFERENCE: usize = 0;

    /// Create an empty arena over the candidate alleles.
    pub fn new(alleles: Vec<AlleleKey>) -> Result<Self, CallerError> {
        if alleles.is_empty() {
            return Err(CallerError::EmptyAlleleSet);
        }
        Ok(Self {
            alleles,
            genotypes: Vec::new(),
            by_ploidy: BTreeMap::new(),
        })
    }

    /// Create the arena and enumerate genotypes once per distinct ploidy.
    pub fn build(
        alleles: Vec<AlleleKey>,
        ploidies: impl IntoIterator<Item = u32>,
    ) -> Result<Self, CallerError> {
        let mut space = Self::new(alleles)?;
        for ploidy in ploidies {
            space.ensure_ploidy(ploidy)?;
        }
        Ok(space)
    }

    /// Enumerate genotypes for `ploidy` unless already cached.
    pub fn ensure_ploidy(&mut self, ploidy: u32) -> Result<Range<usize>, CallerError> {
        if ploidy == 0 {
            return Err(CallerError::InvalidPloidy { ploidy });
        }
        if let Some(range) = self.by_ploidy.get(&ploidy) {
            return Ok(range.clone());
        }
        tracing::trace!(ploidy, alleles = self.alleles.len(), "enumerating genotypes");
        let start = self.genotypes.len();
        self.genotypes
            .extend(enumerate_genotypes(ploidy, self.alleles.len()));
        let range = start..self.genotypes.len();
        self.by_ploidy.insert(ploidy, range.clone());
        Ok(range)
    }

    /// Candidate alleles; index 0 is the reference.
    pub fn alleles(&self) -> &[AlleleKey] {
        &self.alleles
    }

    /// Candidate index of a key.
    pub fn index_of(&self, key: &AlleleKey) -> Option<usize> {
        self.alleles.iter().position(|candidate| candidate == key)
    }

    /// Genotype by id.
    ///
    /// # Panics
    /// Panics if the id was not produced by this arena.
    pub fn genotype(&self, id: GenotypeId) -> &Genotype {
        &self.genotypes[id.0]
    }

    /// Arena range of genotypes with the given ploidy.
    pub fn ploidy_range(&self, ploidy: u32) -> Option<Range<usize>> {
        self.by_ploidy.get(&ploidy).cloned()
    }

    /// Genotype ids for the given ploidy, in enumeration order.
    pub fn ids_for_ploidy(&self, ploidy: u32) -> impl Iterator<Item = GenotypeId> {
        self.ploidy_range(ploidy).unwrap_or(0..0).map(GenotypeId)
    }

    /// The genotype homozygous for `allele` at the given ploidy.
    pub fn homozygous(&self, ploidy: u32, allele: usize) -> Option<GenotypeId> {
        self.ids_for_ploidy(ploidy)
            .find(|&id| self.genotype(id).homozygous_allele() == Some(allele))
    }

    /// Total number of genotypes across ploidies.
    pub fn len(&self) -> usize {
        self.genotypes.len()
    }

    /// Whether no genotype has been enumerated yet.
    pub fn is_empty(&self) -> bool {
        self.genotypes.is_empty()
    }

    /// Render a genotype as slash-separated allele labels, e.g. `A/T`.
    pub fn label(&self, id: GenotypeId) -> String {
        self.genotype(id)
            .alleles()
            .iter()
            .map(|&allele| self.alleles[allele].to_string())
            .join("/")
    }
}
