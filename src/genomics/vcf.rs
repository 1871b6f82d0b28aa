//! Rendering of called sites: VCF records, JSON lines and failed-site BED
//! lines.

use std::io::{self, Write};
use std::sync::Arc;

use bio::stats::{PHREDProb, Prob};
use serde::Serialize;

use crate::genomics::{AlleleKey, AlleleType, GenotypeId, GenotypeSpace, SiteCall};

/// Upper bound on emitted Phred values; certain calls would otherwise be `inf`.
pub const MAX_PHRED: f64 = 10_000.0;

const META: &str = "##fileformat=VCFv4.2\n\
##source=bayescall\n\
##INFO=<ID=NS,Number=1,Type=Integer,Description=\"Number of samples with data\">\n\
##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total observations at the site\">\n\
##INFO=<ID=AC,Number=A,Type=Integer,Description=\"Alternate copies in the best genotype combination\">\n\
##INFO=<ID=AF,Number=A,Type=Float,Description=\"Alternate frequency in the best genotype combination\">\n\
##INFO=<ID=TYPE,Number=A,Type=String,Description=\"Allele type: snp, ins, del or mnp\">\n\
##INFO=<ID=LEN,Number=A,Type=Integer,Description=\"Allele length\">\n\
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
##FORMAT=<ID=GQ,Number=1,Type=Integer,Description=\"Phred-scaled probability that the genotype is wrong\">\n\
##FORMAT=<ID=DP,Number=1,Type=Integer,Description=\"Observations in the sample\">\n";

/// Phred-scale an error probability, capped at [`MAX_PHRED`].
pub fn phred(error_probability: f64) -> f64 {
    let phred = *PHREDProb::from(Prob(error_probability.clamp(0.0, 1.0)));
    if phred.is_nan() {
        0.0
    } else {
        // adding 0.0 turns the -0.0 of p = 1 into 0.0
        phred.clamp(0.0, MAX_PHRED) + 0.0
    }
}

/// How called sites are turned into output lines.
#[derive(Debug, Clone)]
pub struct CallRenderer {
    samples: Vec<Arc<str>>,
    pvar_threshold: f64,
    report_all_alternates: bool,
}

impl CallRenderer {
    /// Renderer with one VCF column per sample, in the given order.
    pub fn new(samples: Vec<Arc<str>>, pvar_threshold: f64) -> Self {
        Self {
            samples,
            pvar_threshold,
            report_all_alternates: false,
        }
    }

    /// Emit one VCF record per alternate of the best combination.
    pub fn with_all_alternates(mut self, report_all: bool) -> Self {
        self.report_all_alternates = report_all;
        self
    }

    /// Whether the site clears the reporting threshold.
    pub fn is_reportable(&self, call: &SiteCall) -> bool {
        call.p_var() >= self.pvar_threshold
    }

    /// Write the VCF meta lines and the column header.
    pub fn write_header<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(META.as_bytes())?;
        write!(writer, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT")?;
        for sample in &self.samples {
            write!(writer, "\t{sample}")?;
        }
        writeln!(writer)
    }

    /// Write the VCF record(s) of a site if it clears the threshold.
    ///
    /// Returns the number of records written.
    pub fn write_vcf_records<W: Write>(&self, writer: &mut W, call: &SiteCall) -> io::Result<usize> {
        if !self.is_reportable(call) {
            return Ok(0);
        }
        let alternates = reported_alternates(call, self.report_all_alternates);
        let total_copies: u32 = call.best_combo().allele_counts(&call.space).iter().sum();
        let quality = phred(1.0 - call.p_var());
        for &(allele, copies) in &alternates {
            let key = &call.genotype_alleles()[allele];
            let reference = char::from(call.reference_base);
            let frequency = if total_copies == 0 {
                0.0
            } else {
                f64::from(copies) / f64::from(total_copies)
            };
            write!(
                writer,
                "{chrom}\t{pos}\t.\t{reference}\t{alt}\t{quality:.2}\t.\t\
                 NS={ns};DP={dp};AC={copies};AF={frequency:.4};TYPE={kind};LEN={len}\tGT:GQ:DP",
                chrom = call.chrom,
                pos = u64::from(call.position) + 1,
                alt = vcf_alternate(key, call.reference_base),
                ns = call.samples.len(),
                dp = call.coverage,
                kind = key.allele_type,
                len = key.length,
            )?;
            for name in &self.samples {
                write!(writer, "\t{}", sample_field(call, name, allele))?;
            }
            writeln!(writer)?;
        }
        Ok(alternates.len())
    }

    /// Write one JSON line describing the site.
    pub fn write_json<W: Write>(&self, writer: &mut W, call: &SiteCall) -> io::Result<()> {
        serde_json::to_writer(&mut *writer, &SiteJson::from_call(call))?;
        writeln!(writer)
    }

    /// Write BED lines for every candidate alternate of a site below the
    /// threshold. Returns the number of lines written.
    pub fn write_failed<W: Write>(&self, writer: &mut W, call: &SiteCall) -> io::Result<usize> {
        if self.is_reportable(call) {
            return Ok(0);
        }
        let mut written = 0;
        for key in call.genotype_alleles().iter().skip(1) {
            let start = u64::from(call.position);
            let end = start + u64::from(key.length.max(1));
            writeln!(writer, "{}\t{start}\t{end}\t{key}", call.chrom)?;
            written += 1;
        }
        Ok(written)
    }
}

fn reported_alternates(call: &SiteCall, report_all: bool) -> Vec<(usize, u32)> {
    let mut alternates = call.alternates();
    if alternates.is_empty() {
        // best combination is homozygous reference; report the first candidate
        alternates.push((1, 0));
    }
    if !report_all {
        alternates.truncate(1);
    }
    alternates
}

fn vcf_alternate(key: &AlleleKey, reference_base: u8) -> String {
    let reference = char::from(reference_base);
    match key.allele_type {
        AlleleType::Insertion => format!("{reference}{}", key.bases_str()),
        AlleleType::Deletion => "<DEL>".to_string(),
        _ => key.bases_str().into_owned(),
    }
}

fn sample_field(call: &SiteCall, name: &str, allele: usize) -> String {
    let (Some(sample), Some(id)) = (call.sample(name), call.best_genotype_of(name)) else {
        return ".:.:0".to_string();
    };
    let genotype = call.space.genotype(id);
    let gt = genotype
        .alleles()
        .iter()
        .map(|&a| match a {
            GenotypeSpace::REFERENCE => "0",
            a if a == allele => "1",
            _ => ".",
        })
        .collect::<Vec<_>>()
        .join("/");
    let marginal = sample.marginal_of(id).unwrap_or(0.0);
    let gq = phred(1.0 - marginal).round();
    format!("{gt}:{gq}:{}", sample.coverage)
}

#[derive(Debug, Serialize)]
struct SiteJson<'a> {
    chrom: &'a str,
    position: u64,
    reference: String,
    alleles: Vec<String>,
    p_var: f64,
    quality: f64,
    best_genotypes: Vec<String>,
    best_score: f64,
    ewens_probability: f64,
    combos_tested: usize,
    coverage: usize,
    posterior_normalizer: f64,
    samples: Vec<SampleJson<'a>>,
}

#[derive(Debug, Serialize)]
struct SampleJson<'a> {
    name: &'a str,
    ploidy: u32,
    coverage: usize,
    genotypes: Vec<GenotypeJson>,
}

#[derive(Debug, Serialize)]
struct GenotypeJson {
    genotype: String,
    ln_likelihood: f64,
    marginal: f64,
}

impl<'a> SiteJson<'a> {
    fn from_call(call: &'a SiteCall) -> Self {
        let label = |id: GenotypeId| call.space.label(id);
        Self {
            chrom: &call.chrom,
            position: u64::from(call.position) + 1,
            reference: char::from(call.reference_base).to_string(),
            alleles: call.genotype_alleles().iter().map(ToString::to_string).collect(),
            p_var: call.p_var(),
            quality: phred(1.0 - call.p_var()),
            best_genotypes: call.best_combo().genotypes().iter().map(|&id| label(id)).collect(),
            best_score: call.best_score(),
            ewens_probability: call.best_ewens_probability,
            combos_tested: call.combos_tested,
            coverage: call.coverage,
            posterior_normalizer: call.posterior_normalizer(),
            samples: call
                .samples
                .iter()
                .map(|sample| SampleJson {
                    name: &sample.name,
                    ploidy: sample.ploidy,
                    coverage: sample.coverage,
                    genotypes: sample
                        .likelihoods()
                        .iter()
                        .map(|entry| GenotypeJson {
                            genotype: label(entry.genotype),
                            ln_likelihood: entry.ln_likelihood,
                            marginal: entry.marginal,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Render the header plus every reportable record into a string.
pub fn render_vcf(renderer: &CallRenderer, calls: &[SiteCall]) -> io::Result<String> {
    let mut buffer = Vec::new();
    renderer.write_header(&mut buffer)?;
    for call in calls {
        renderer.write_vcf_records(&mut buffer, call)?;
    }
    String::from_utf8(buffer).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallerConfig;
    use crate::genomics::{
        Allele, NullTrace, PloidyMap, Sample, SiteCaller, SiteObservations,
    };

    fn observations(reference: usize, alternate: usize) -> Vec<Allele> {
        (0..reference)
            .map(|i| Allele::new(AlleleType::Reference, "C", 1, format!("r{i}"), 30, 60))
            .chain(
                (0..alternate)
                    .map(|i| Allele::new(AlleleType::Snp, "G", 1, format!("a{i}"), 30, 60)),
            )
            .collect()
    }

    fn called_site(config: CallerConfig, samples: Vec<Sample>) -> SiteCall {
        let site = SiteObservations {
            chrom: Arc::from("chr3"),
            position: 41,
            reference_base: b'C',
            samples,
            in_target: true,
        };
        let mut caller = SiteCaller::new(config, PloidyMap::default()).unwrap();
        caller
            .call_site(&site, &mut NullTrace)
            .unwrap()
            .into_call()
            .expect("site should be called")
    }

    #[test]
    fn phred_is_capped_and_non_negative() {
        assert_eq!(phred(0.0), MAX_PHRED);
        assert_eq!(phred(1.0), 0.0);
        assert!((phred(0.01) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn vcf_record_carries_genotypes_per_sample_column() {
        let call = called_site(
            CallerConfig::default(),
            vec![
                Sample::new("het", observations(6, 6)),
                Sample::new("ref", observations(12, 0)),
            ],
        );
        let names: Vec<Arc<str>> = vec![Arc::from("het"), Arc::from("ref"), Arc::from("absent")];
        let renderer = CallRenderer::new(names, 1e-4);
        let text = render_vcf(&renderer, std::slice::from_ref(&call)).unwrap();
        let header = text.lines().find(|l| l.starts_with("#CHROM")).unwrap();
        assert!(header.ends_with("FORMAT\thet\tref\tabsent"));

        let record: Vec<&str> = text.lines().last().unwrap().split('\t').collect();
        assert_eq!(&record[..5], &["chr3", "42", ".", "C", "G"]);
        assert!(record[7].contains("DP=18;AC=1;AF=0.2500"));
        assert!(record[9].starts_with("0/1:"));
        assert!(record[10].starts_with("0/0:"));
        assert_eq!(record[11], ".:.:0");
    }

    #[test]
    fn every_alternate_gets_a_record_when_requested() {
        let mut alleles: Vec<Allele> = (0..8)
            .map(|i| Allele::new(AlleleType::Snp, "T", 1, format!("t{i}"), 30, 60))
            .collect();
        alleles.extend((0..8).map(|i| Allele::new(AlleleType::Snp, "G", 1, format!("g{i}"), 30, 60)));
        let call = called_site(CallerConfig::default(), vec![Sample::new("s1", alleles)]);
        assert_eq!(call.alternates(), vec![(1, 1), (2, 1)]);

        let names: Vec<Arc<str>> = vec![Arc::from("s1")];
        let renderer = CallRenderer::new(names.clone(), 1e-4).with_all_alternates(true);
        let mut out = Vec::new();
        assert_eq!(renderer.write_vcf_records(&mut out, &call).unwrap(), 2);
        let text = String::from_utf8(out).unwrap();
        let records: Vec<Vec<&str>> = text.lines().map(|l| l.split('\t').collect()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0][4], "G");
        assert_eq!(records[1][4], "T");
        for record in &records {
            assert!(record[7].contains("AC=1;AF=0.5000"));
        }

        let renderer = CallRenderer::new(names, 1e-4);
        let mut out = Vec::new();
        assert_eq!(renderer.write_vcf_records(&mut out, &call).unwrap(), 1);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().next().unwrap().split('\t').nth(4), Some("G"));
    }

    #[test]
    fn low_pvar_sites_go_to_failed_output() {
        let call = called_site(
            CallerConfig::default(),
            vec![Sample::new("s1", observations(30, 1))],
        );
        let renderer = CallRenderer::new(vec![Arc::from("s1")], 0.999);
        assert!(!renderer.is_reportable(&call));
        let mut vcf = Vec::new();
        assert_eq!(renderer.write_vcf_records(&mut vcf, &call).unwrap(), 0);
        let mut bed = Vec::new();
        assert_eq!(renderer.write_failed(&mut bed, &call).unwrap(), 1);
        assert_eq!(String::from_utf8(bed).unwrap(), "chr3\t41\t42\tG\n");
    }

    #[test]
    fn json_line_is_valid_json() {
        let call = called_site(
            CallerConfig::default(),
            vec![Sample::new("s1", observations(4, 4))],
        );
        let renderer = CallRenderer::new(vec![Arc::from("s1")], 1e-4);
        let mut out = Vec::new();
        renderer.write_json(&mut out, &call).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["position"], 42);
        assert_eq!(value["alleles"], serde_json::json!(["C", "G"]));
        assert_eq!(value["samples"][0]["genotypes"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn alternate_rendering_follows_allele_type() {
        let ins = AlleleKey::new(AlleleType::Insertion, b"TT".to_vec(), 2);
        let del = AlleleKey::new(AlleleType::Deletion, Vec::<u8>::new(), 3);
        assert_eq!(vcf_alternate(&ins, b'A'), "ATT");
        assert_eq!(vcf_alternate(&del, b'A'), "<DEL>");
    }
}
