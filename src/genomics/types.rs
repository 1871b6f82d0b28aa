use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

/// Kind of sequence change an allele describes relative to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlleleType {
    /// Matches the reference.
    Reference,
    /// Single-nucleotide substitution.
    Snp,
    /// Bases inserted after the position.
    Insertion,
    /// Reference bases removed starting at the position.
    Deletion,
    /// Multi-nucleotide substitution.
    Mnp,
}

impl AlleleType {
    const fn bit(self) -> u8 {
        match self {
            AlleleType::Reference => 1,
            AlleleType::Snp => 1 << 1,
            AlleleType::Insertion => 1 << 2,
            AlleleType::Deletion => 1 << 3,
            AlleleType::Mnp => 1 << 4,
        }
    }

    /// Short lowercase name used in text formats.
    pub fn as_str(self) -> &'static str {
        match self {
            AlleleType::Reference => "ref",
            AlleleType::Snp => "snp",
            AlleleType::Insertion => "ins",
            AlleleType::Deletion => "del",
            AlleleType::Mnp => "mnp",
        }
    }
}

impl fmt::Display for AlleleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlleleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ref" | "reference" => Ok(AlleleType::Reference),
            "snp" => Ok(AlleleType::Snp),
            "ins" | "insertion" => Ok(AlleleType::Insertion),
            "del" | "deletion" => Ok(AlleleType::Deletion),
            "mnp" => Ok(AlleleType::Mnp),
            other => Err(format!("unknown allele type '{other}'")),
        }
    }
}

/// Bitmask of allele types admitted as genotype candidates.
///
/// The reference type is always a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlleleTypes(u8);

impl AlleleTypes {
    /// Only the reference allele.
    pub const fn reference_only() -> Self {
        Self(AlleleType::Reference.bit())
    }

    /// Add a type to the mask.
    pub const fn with(self, allele_type: AlleleType) -> Self {
        Self(self.0 | allele_type.bit())
    }

    /// Whether the mask admits the given type.
    pub const fn contains(self, allele_type: AlleleType) -> bool {
        self.0 & allele_type.bit() != 0
    }
}

impl Default for AlleleTypes {
    fn default() -> Self {
        Self::reference_only().with(AlleleType::Snp)
    }
}

/// Equivalence class of alleles: observations sharing a key are the same
/// candidate allele.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlleleKey {
    /// Kind of change.
    pub allele_type: AlleleType,
    /// Bases carried by the allele (inserted/substituted/deleted sequence).
    pub bases: Arc<[u8]>,
    /// Reference span (deletions) or allele length (other types).
    pub length: u32,
}

impl AlleleKey {
    /// Key of the reference allele for a single reference base.
    pub fn reference(base: u8) -> Self {
        Self {
            allele_type: AlleleType::Reference,
            bases: Arc::from(vec![base.to_ascii_uppercase()].into_boxed_slice()),
            length: 1,
        }
    }

    /// Construct a key from its parts.
    pub fn new(allele_type: AlleleType, bases: impl Into<Arc<[u8]>>, length: u32) -> Self {
        Self {
            allele_type,
            bases: bases.into(),
            length,
        }
    }

    /// Bases rendered as text.
    pub fn bases_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bases)
    }

    /// Whether this key denotes the reference allele.
    pub fn is_reference(&self) -> bool {
        self.allele_type == AlleleType::Reference
    }
}

impl fmt::Display for AlleleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.allele_type {
            AlleleType::Deletion => write!(f, "D{}", self.length),
            AlleleType::Insertion => write!(f, "I{}", self.bases_str()),
            _ => f.write_str(&self.bases_str()),
        }
    }
}

/// A single allele observation supported by one read.
#[derive(Debug, Clone, PartialEq)]
pub struct Allele {
    /// Kind of change.
    pub allele_type: AlleleType,
    /// Observed bases stored as uppercase ASCII.
    pub bases: Arc<[u8]>,
    /// Reference span (deletions) or allele length (other types).
    pub length: u32,
    /// Identifier of the supporting read.
    pub read_id: Arc<str>,
    /// Base-call quality (Phred-scaled).
    pub base_quality: u8,
    /// Mapping quality of the supporting read (Phred-scaled).
    pub mapping_quality: u8,
}

impl Allele {
    /// Construct a new allele observation.
    pub fn new(
        allele_type: AlleleType,
        bases: impl AsRef<[u8]>,
        length: u32,
        read_id: impl Into<Arc<str>>,
        base_quality: u8,
        mapping_quality: u8,
    ) -> Self {
        let bases: Vec<u8> = bases.as_ref().to_ascii_uppercase();
        Self {
            allele_type,
            bases: Arc::from(bases.into_boxed_slice()),
            length,
            read_id: read_id.into(),
            base_quality,
            mapping_quality,
        }
    }

    /// Equivalence key of this observation.
    pub fn key(&self) -> AlleleKey {
        AlleleKey {
            allele_type: self.allele_type,
            bases: Arc::clone(&self.bases),
            length: self.length,
        }
    }

    /// Observed bases rendered as text.
    pub fn bases_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bases)
    }
}

/// Observations of one sample sharing an equivalence key.
#[derive(Debug, Clone, PartialEq)]
pub struct AlleleGroup {
    /// Shared key.
    pub key: AlleleKey,
    /// Supporting observations, in arrival order.
    pub observations: Vec<Allele>,
}

impl AlleleGroup {
    /// Number of supporting observations.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Whether the group has no observations.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Allele observations of one biological sample at a single position.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Sample name.
    pub name: Arc<str>,
    groups: Vec<AlleleGroup>,
}

impl Sample {
    /// Group observations by equivalence key; groups are ordered by key.
    pub fn new(name: impl Into<Arc<str>>, observations: impl IntoIterator<Item = Allele>) -> Self {
        let mut grouped: BTreeMap<AlleleKey, Vec<Allele>> = BTreeMap::new();
        for allele in observations {
            grouped.entry(allele.key()).or_default().push(allele);
        }
        Self {
            name: name.into(),
            groups: grouped
                .into_iter()
                .map(|(key, observations)| AlleleGroup { key, observations })
                .collect(),
        }
    }

    /// Observation groups ordered by key.
    pub fn groups(&self) -> &[AlleleGroup] {
        &self.groups
    }

    /// All observations across groups.
    pub fn observations(&self) -> impl Iterator<Item = &Allele> {
        self.groups.iter().flat_map(|group| group.observations.iter())
    }

    /// Total number of observations.
    pub fn observation_count(&self) -> usize {
        self.groups.iter().map(AlleleGroup::len).sum()
    }
}

/// Whether the base is one of the four canonical nucleotides.
pub fn is_acgt(base: u8) -> bool {
    matches!(base.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T')
}
