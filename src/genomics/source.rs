//! Interface to the collaborator that streams per-site allele observations,
//! plus two implementations: an in-memory queue and a tab-separated
//! observation file reader.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, BufRead};
use std::ops::Range;
use std::sync::Arc;

use bio::data_structures::interval_tree::ArrayBackedIntervalTree;
use serde::Deserialize;
use thiserror::Error;

use crate::genomics::{Allele, AlleleType, Sample};

/// Errors produced while reading observations or targets.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Underlying reader failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A line could not be parsed.
    #[error("line {line}: {message}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },
}

impl SourceError {
    fn parse(line: usize, message: impl Into<String>) -> Self {
        SourceError::Parse {
            line,
            message: message.into(),
        }
    }

    /// Map a reader error, shifting its line by lines consumed before the
    /// CSV reader took over.
    fn from_csv(err: csv::Error, line_offset: usize) -> Self {
        let line = err.position().map_or(0, |pos| pos.line() as usize) + line_offset;
        let message = err.to_string();
        match err.into_kind() {
            csv::ErrorKind::Io(err) => SourceError::Io(err),
            _ => SourceError::parse(line, message),
        }
    }
}

fn record_line(record: &csv::StringRecord, line_offset: usize) -> usize {
    record.position().map_or(0, |pos| pos.line() as usize) + line_offset
}

/// Everything the caller needs to know about one position.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteObservations {
    /// Contig name.
    pub chrom: Arc<str>,
    /// 0-based position.
    pub position: u32,
    /// Reference base at the position.
    pub reference_base: u8,
    /// Samples with at least one observation, in sample-list order.
    pub samples: Vec<Sample>,
    /// Whether the position lies inside the analysed targets.
    pub in_target: bool,
}

impl SiteObservations {
    /// Total observations across samples.
    pub fn coverage(&self) -> usize {
        self.samples.iter().map(Sample::observation_count).sum()
    }
}

/// Source of per-site observations, consumed one position at a time.
pub trait AlleleSource {
    /// Next position, or `None` once exhausted.
    fn next_site(&mut self) -> Result<Option<SiteObservations>, SourceError>;

    /// Names of all samples known to the source, in output order.
    fn sample_names(&self) -> &[Arc<str>];
}

/// Sample name → ploidy, with a default for unlisted samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PloidyMap {
    default: u32,
    overrides: HashMap<Arc<str>, u32>,
}

impl PloidyMap {
    /// Every sample has `default` ploidy unless overridden.
    pub fn new(default: u32) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Override one sample's ploidy (e.g. `2 × pool size` for pools).
    pub fn with_sample(mut self, name: impl Into<Arc<str>>, ploidy: u32) -> Self {
        self.overrides.insert(name.into(), ploidy);
        self
    }

    /// Ploidy of the named sample.
    pub fn ploidy_of(&self, name: &str) -> u32 {
        self.overrides.get(name).copied().unwrap_or(self.default)
    }
}

impl Default for PloidyMap {
    fn default() -> Self {
        Self::new(2)
    }
}

type IntervalTree = ArrayBackedIntervalTree<u32, ()>;

#[derive(Debug, Deserialize)]
struct BedRecord {
    chrom: String,
    begin: u32,
    end: u32,
}

/// Half-open target intervals per contig, indexed for point lookups.
#[derive(Debug, Clone, Default)]
pub struct TargetRegions {
    trees: HashMap<Arc<str>, IntervalTree>,
}

impl TargetRegions {
    /// Build from `(chrom, range)` pairs (0-based, half-open). Empty ranges
    /// hold no position and are dropped.
    pub fn from_intervals<C, I>(intervals: I) -> Self
    where
        C: Into<Arc<str>>,
        I: IntoIterator<Item = (C, Range<u32>)>,
    {
        let mut trees: HashMap<Arc<str>, IntervalTree> = HashMap::new();
        for (chrom, range) in intervals {
            if range.start < range.end {
                trees
                    .entry(chrom.into())
                    .or_insert_with(IntervalTree::new)
                    .insert(range, ());
            }
        }
        trees.values_mut().for_each(|tree| tree.index());
        Self { trees }
    }

    /// Parse BED records (`chrom begin end ...`); `#`, `track` and `browser`
    /// lines are ignored.
    pub fn from_bed<R: BufRead>(reader: R) -> Result<Self, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .delimiter(b'\t')
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut intervals = Vec::new();
        let mut record = csv::StringRecord::new();
        while reader
            .read_record(&mut record)
            .map_err(|err| SourceError::from_csv(err, 0))?
        {
            let first = record.get(0).unwrap_or_default();
            if first.starts_with("track") || first.starts_with("browser") {
                continue;
            }
            let line = record_line(&record, 0);
            if record.len() < 3 {
                return Err(SourceError::parse(line, "expected chrom, begin and end"));
            }
            record.truncate(3);
            let bed: BedRecord = record
                .deserialize(None)
                .map_err(|err| SourceError::parse(line, err.to_string()))?;
            if bed.end < bed.begin {
                return Err(SourceError::parse(line, "end precedes begin"));
            }
            intervals.push((bed.chrom, bed.begin..bed.end));
        }
        Ok(Self::from_intervals(intervals))
    }

    /// Whether the 0-based position lies in any interval of the contig.
    pub fn contains(&self, chrom: &str, position: u32) -> bool {
        self.trees.get(chrom).map_or(false, |tree| {
            !tree.find(position..position.saturating_add(1)).is_empty()
        })
    }

    /// Whether no interval was registered.
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

/// Source replaying pre-built sites.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    sites: VecDeque<SiteObservations>,
    samples: Vec<Arc<str>>,
}

impl InMemorySource {
    /// Replay `sites` in order; sample names are taken from the sites in
    /// first-seen order.
    pub fn new(sites: Vec<SiteObservations>) -> Self {
        let mut samples: Vec<Arc<str>> = Vec::new();
        for sample in sites.iter().flat_map(|site| site.samples.iter()) {
            if !samples.iter().any(|known| known == &sample.name) {
                samples.push(Arc::clone(&sample.name));
            }
        }
        Self {
            sites: sites.into(),
            samples,
        }
    }
}

impl AlleleSource for InMemorySource {
    fn next_site(&mut self) -> Result<Option<SiteObservations>, SourceError> {
        Ok(self.sites.pop_front())
    }

    fn sample_names(&self) -> &[Arc<str>] {
        &self.samples
    }
}

#[derive(Debug, Deserialize)]
struct ObservationRecord {
    chrom: String,
    position: u32,
    reference: String,
    sample: String,
    read_id: String,
    allele_type: String,
    bases: String,
    base_quality: u8,
    mapping_quality: u8,
}

#[derive(Debug)]
struct ObservationRow {
    line: usize,
    chrom: Arc<str>,
    position: u32,
    reference_base: u8,
    sample: Arc<str>,
    allele: Allele,
}

/// Reads one observation per line, tab-separated:
///
/// `chrom  pos(1-based)  ref  sample  read_id  type  bases  base_qual  map_qual`
///
/// Rows of one position must be contiguous and positions must ascend within
/// a contig; a contig cannot resume once another has started. Leading
/// `#samples` lines list samples in output order; samples not listed are
/// appended as they appear. Other `#` lines are comments.
#[derive(Debug)]
pub struct ObservationFileSource<R: BufRead> {
    reader: csv::Reader<R>,
    record: csv::StringRecord,
    line_offset: usize,
    pending: Option<ObservationRow>,
    samples: Vec<Arc<str>>,
    targets: Option<TargetRegions>,
    last: Option<(Arc<str>, u32)>,
    finished_contigs: HashSet<Arc<str>>,
}

impl<R: BufRead> ObservationFileSource<R> {
    /// Wrap a reader; the header is consumed eagerly.
    pub fn new(mut reader: R) -> Result<Self, SourceError> {
        let mut samples = Vec::new();
        let line_offset = read_header(&mut reader, &mut samples)?;
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .delimiter(b'\t')
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);
        Ok(Self {
            reader,
            record: csv::StringRecord::new(),
            line_offset,
            pending: None,
            samples,
            targets: None,
            last: None,
            finished_contigs: HashSet::new(),
        })
    }

    /// Restrict `in_target` to the given regions.
    pub fn with_targets(mut self, targets: TargetRegions) -> Self {
        self.targets = Some(targets);
        self
    }

    fn intern_sample(&mut self, name: &str) -> Arc<str> {
        match self.samples.iter().find(|known| known.as_ref() == name) {
            Some(known) => Arc::clone(known),
            None => {
                let name: Arc<str> = Arc::from(name);
                tracing::debug!(sample = %name, "discovered sample not listed in header");
                self.samples.push(Arc::clone(&name));
                name
            }
        }
    }

    fn next_row(&mut self) -> Result<Option<ObservationRow>, SourceError> {
        if let Some(row) = self.pending.take() {
            return Ok(Some(row));
        }
        let more = self
            .reader
            .read_record(&mut self.record)
            .map_err(|err| SourceError::from_csv(err, self.line_offset))?;
        if !more {
            return Ok(None);
        }
        let line = record_line(&self.record, self.line_offset);
        if self.record.len() != 9 {
            return Err(SourceError::parse(
                line,
                format!("expected 9 tab-separated fields, found {}", self.record.len()),
            ));
        }
        let raw: ObservationRecord = self
            .record
            .deserialize(None)
            .map_err(|err| SourceError::parse(line, err.to_string()))?;
        if raw.position == 0 {
            return Err(SourceError::parse(line, "positions are 1-based"));
        }
        let reference_base = match raw.reference.as_bytes() {
            [base] => base.to_ascii_uppercase(),
            _ => return Err(SourceError::parse(line, "reference must be a single base")),
        };
        let allele_type: AlleleType = raw
            .allele_type
            .parse()
            .map_err(|err: String| SourceError::parse(line, err))?;
        let length = raw.bases.len().max(1) as u32;

        Ok(Some(ObservationRow {
            line,
            chrom: Arc::from(raw.chrom),
            position: raw.position - 1,
            reference_base,
            sample: self.intern_sample(&raw.sample),
            allele: Allele::new(
                allele_type,
                raw.bases,
                length,
                raw.read_id,
                raw.base_quality,
                raw.mapping_quality,
            ),
        }))
    }

    /// Reject a site that goes back to an earlier position or contig.
    fn check_order(&mut self, row: &ObservationRow) -> Result<(), SourceError> {
        match &self.last {
            Some((chrom, position)) if *chrom == row.chrom => {
                if row.position <= *position {
                    return Err(SourceError::parse(
                        row.line,
                        format!(
                            "position {}:{} is not after {}:{}",
                            row.chrom,
                            u64::from(row.position) + 1,
                            chrom,
                            u64::from(*position) + 1
                        ),
                    ));
                }
            }
            Some((chrom, _)) => {
                if self.finished_contigs.contains(&row.chrom) {
                    return Err(SourceError::parse(
                        row.line,
                        format!("contig {} resumes after other contigs", row.chrom),
                    ));
                }
                self.finished_contigs.insert(Arc::clone(chrom));
            }
            None => {}
        }
        self.last = Some((Arc::clone(&row.chrom), row.position));
        Ok(())
    }
}

/// Consume leading `#` and blank lines, collecting `#samples` names.
/// Returns the number of lines consumed.
fn read_header<R: BufRead>(reader: &mut R, samples: &mut Vec<Arc<str>>) -> io::Result<usize> {
    let mut consumed = 0;
    let mut line = String::new();
    loop {
        match reader.fill_buf()?.first() {
            Some(b'#' | b'\n' | b'\r') => {}
            _ => return Ok(consumed),
        }
        line.clear();
        reader.read_line(&mut line)?;
        consumed += 1;
        if let Some(rest) = line.strip_prefix("#samples") {
            samples.extend(rest.split_whitespace().map(Arc::from));
        }
    }
}

impl<R: BufRead> AlleleSource for ObservationFileSource<R> {
    fn next_site(&mut self) -> Result<Option<SiteObservations>, SourceError> {
        let Some(first) = self.next_row()? else {
            return Ok(None);
        };
        self.check_order(&first)?;
        let chrom = Arc::clone(&first.chrom);
        let position = first.position;
        let reference_base = first.reference_base;

        let mut by_sample: HashMap<Arc<str>, Vec<Allele>> = HashMap::new();
        by_sample.entry(first.sample).or_default().push(first.allele);

        while let Some(row) = self.next_row()? {
            if row.chrom != chrom || row.position != position {
                self.pending = Some(row);
                break;
            }
            if row.reference_base != reference_base {
                return Err(SourceError::parse(
                    row.line,
                    "reference base differs from earlier rows of the same position",
                ));
            }
            by_sample.entry(row.sample).or_default().push(row.allele);
        }

        let samples = self
            .samples
            .iter()
            .filter_map(|name| {
                by_sample
                    .remove(name)
                    .map(|observations| Sample::new(Arc::clone(name), observations))
            })
            .collect();
        let in_target = self
            .targets
            .as_ref()
            .map_or(true, |targets| targets.contains(&chrom, position));

        Ok(Some(SiteObservations {
            chrom,
            position,
            reference_base,
            samples,
            in_target,
        }))
    }

    fn sample_names(&self) -> &[Arc<str>] {
        &self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const OBSERVATIONS: &str = "\
#samples\tmother\tchild
chr1\t10\tA\tchild\tr1\tref\tA\t30\t60
chr1\t10\tA\tchild\tr2\tsnp\tT\t32\t60
chr1\t10\tA\tmother\tr3\tref\tA\t35\t50

chr1\t11\tC\tfather\tr4\tsnp\tG\t20\t60
";

    #[test]
    fn observation_file_groups_rows_by_position() {
        let mut source = ObservationFileSource::new(Cursor::new(OBSERVATIONS)).unwrap();
        let site = source.next_site().unwrap().unwrap();
        assert_eq!(site.chrom.as_ref(), "chr1");
        assert_eq!(site.position, 9);
        assert_eq!(site.reference_base, b'A');
        let names: Vec<&str> = site.samples.iter().map(|s| s.name.as_ref()).collect();
        assert_eq!(names, vec!["mother", "child"]);
        assert_eq!(site.coverage(), 3);

        let site = source.next_site().unwrap().unwrap();
        assert_eq!(site.position, 10);
        assert_eq!(site.samples.len(), 1);
        assert!(source.next_site().unwrap().is_none());
        assert_eq!(source.sample_names().len(), 3);
    }

    #[test]
    fn malformed_rows_report_line_numbers() {
        let input = "chr1\t10\tA\ts\tr1\tsnp\tT\thigh\t60\n";
        let mut source = ObservationFileSource::new(Cursor::new(input)).unwrap();
        match source.next_site() {
            Err(SourceError::Parse { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn parse_errors_count_header_lines() {
        let input = "#samples\ts\n# comment\nchr1\t10\tA\ts\tr1\tsnp\tT\t30\t60\nchr1\t11\tA\ts\tr2\tsnp\n";
        let mut source = ObservationFileSource::new(Cursor::new(input)).unwrap();
        assert!(source.next_site().unwrap().is_some());
        match source.next_site() {
            Err(SourceError::Parse { line, .. }) => assert_eq!(line, 4),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn revisited_positions_are_rejected() {
        let input = "\
chr1\t10\tA\ts\tr1\tsnp\tT\t30\t60
chr1\t11\tA\ts\tr2\tsnp\tT\t30\t60
chr1\t10\tA\ts\tr3\tsnp\tT\t30\t60
";
        let mut source = ObservationFileSource::new(Cursor::new(input)).unwrap();
        assert_eq!(source.next_site().unwrap().unwrap().position, 9);
        assert_eq!(source.next_site().unwrap().unwrap().position, 10);
        match source.next_site() {
            Err(SourceError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected ordering error, got {other:?}"),
        }
    }

    #[test]
    fn resumed_contigs_are_rejected() {
        let input = "\
chr1\t10\tA\ts\tr1\tsnp\tT\t30\t60
chr2\t5\tA\ts\tr2\tsnp\tT\t30\t60
chr1\t20\tA\ts\tr3\tsnp\tT\t30\t60
";
        let mut source = ObservationFileSource::new(Cursor::new(input)).unwrap();
        assert!(source.next_site().unwrap().is_some());
        assert!(source.next_site().unwrap().is_some());
        assert!(matches!(
            source.next_site(),
            Err(SourceError::Parse { line: 3, .. })
        ));
    }

    #[test]
    fn bed_accepts_extra_columns_and_rejects_inverted_intervals() {
        let bed = "browser position chr1\nchr1\t100\t200\tgeneA\t0\t+\n";
        let targets = TargetRegions::from_bed(Cursor::new(bed)).unwrap();
        assert!(targets.contains("chr1", 100));
        assert!(targets.contains("chr1", 199));
        assert!(!targets.contains("chr1", 200));

        let inverted = TargetRegions::from_bed(Cursor::new("chr1\t20\t10\n"));
        assert!(matches!(inverted, Err(SourceError::Parse { line: 1, .. })));
        let garbage = TargetRegions::from_bed(Cursor::new("chr1\tx\t10\n"));
        assert!(matches!(garbage, Err(SourceError::Parse { line: 1, .. })));
    }

    #[test]
    fn many_targets_answer_point_queries() {
        let targets = TargetRegions::from_intervals(
            (0..50_000u32).map(|i| ("chr1", i * 10..i * 10 + 5)),
        );
        assert!(targets.contains("chr1", 0));
        assert!(targets.contains("chr1", 499_994));
        assert!(!targets.contains("chr1", 499_995));
        assert!(!targets.contains("chr1", 7));
        assert!(!targets.contains("chrX", 0));
        assert!(TargetRegions::from_intervals([("chr1", 5..5)]).is_empty());
    }

    #[test]
    fn targets_mark_sites_outside_regions() {
        let targets = TargetRegions::from_bed(Cursor::new("track name=x\nchr1\t9\t10\n")).unwrap();
        assert!(targets.contains("chr1", 9));
        assert!(!targets.contains("chr1", 10));
        assert!(!targets.contains("chr2", 9));

        let mut source = ObservationFileSource::new(Cursor::new(OBSERVATIONS))
            .unwrap()
            .with_targets(targets);
        assert!(source.next_site().unwrap().unwrap().in_target);
        assert!(!source.next_site().unwrap().unwrap().in_target);
    }

    #[test]
    fn ploidy_map_falls_back_to_default() {
        let ploidy = PloidyMap::new(2).with_sample("pool", 20);
        assert_eq!(ploidy.ploidy_of("pool"), 20);
        assert_eq!(ploidy.ploidy_of("other"), 2);
    }

    #[test]
    fn in_memory_source_collects_sample_names() {
        let site = SiteObservations {
            chrom: Arc::from("chr1"),
            position: 0,
            reference_base: b'A',
            samples: vec![Sample::new("b", Vec::new()), Sample::new("a", Vec::new())],
            in_target: true,
        };
        let mut source = InMemorySource::new(vec![site.clone(), site]);
        let expected: Vec<Arc<str>> = vec![Arc::from("b"), Arc::from("a")];
        assert_eq!(source.sample_names(), expected.as_slice());
        assert!(source.next_site().unwrap().is_some());
        assert!(source.next_site().unwrap().is_some());
        assert!(source.next_site().unwrap().is_none());
    }
}
