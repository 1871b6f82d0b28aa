//! Structured trace of every intermediate quantity, for external validation.

use std::io::{self, Write};

use crate::genomics::Allele;

/// One trace event at a site.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceRecord<'a> {
    /// An observation entering the site.
    Allele {
        /// Sample name.
        sample: &'a str,
        /// The observation.
        allele: &'a Allele,
    },
    /// One genotype's data likelihood.
    Likelihood {
        /// Sample name.
        sample: &'a str,
        /// Genotype label.
        genotype: String,
        /// `ln P(data | genotype)`.
        ln_likelihood: f64,
    },
    /// Samples with data, in combination order.
    Samples {
        /// Sample names.
        names: Vec<&'a str>,
    },
    /// Components of one scored combination.
    Combo {
        /// Genotype labels joined per sample.
        genotypes: String,
        /// Summed data likelihood.
        ln_data_likelihood: f64,
        /// Total prior.
        ln_prior: f64,
        /// `ln P(G | Af)`.
        ln_prior_g_af: f64,
        /// `ln P(Af)`.
        ln_prior_af: f64,
        /// Unnormalized log posterior.
        score: f64,
        /// Normalized posterior probability.
        posterior: f64,
    },
    /// The log posterior normalizer.
    Normalizer {
        /// `ln Σ exp(score)`.
        ln_normalizer: f64,
    },
}

/// Receiver of trace records.
pub trait TraceSink {
    /// Whether records should be built at all.
    fn enabled(&self) -> bool {
        true
    }

    /// Consume one record for the 0-based position.
    fn record(&mut self, chrom: &str, position: u32, record: TraceRecord<'_>) -> io::Result<()>;

    /// Push buffered records to their destination.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTrace;

impl TraceSink for NullTrace {
    fn enabled(&self) -> bool {
        false
    }

    fn record(&mut self, _chrom: &str, _position: u32, _record: TraceRecord<'_>) -> io::Result<()> {
        Ok(())
    }
}

/// Writes records as comma-separated lines prefixed by `chrom,pos` (1-based).
///
/// Records of different stages carry different field counts.
#[derive(Debug)]
pub struct CsvTrace<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvTrace<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(writer);
        Self { writer }
    }

    /// Flush and return the writer.
    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|err| err.into_error())
    }

    fn write(&mut self, fields: &[String]) -> io::Result<()> {
        self.writer.write_record(fields).map_err(io::Error::from)
    }
}

impl<W: Write> TraceSink for CsvTrace<W> {
    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn record(&mut self, chrom: &str, position: u32, record: TraceRecord<'_>) -> io::Result<()> {
        let mut fields = vec![chrom.to_string(), (u64::from(position) + 1).to_string()];
        match record {
            TraceRecord::Allele { sample, allele } => fields.extend([
                "allele".to_string(),
                sample.to_string(),
                allele.read_id.to_string(),
                allele.bases_str().into_owned(),
                allele.base_quality.to_string(),
                allele.mapping_quality.to_string(),
            ]),
            TraceRecord::Likelihood {
                sample,
                genotype,
                ln_likelihood,
            } => fields.extend([
                sample.to_string(),
                "likelihood".to_string(),
                genotype,
                ln_likelihood.to_string(),
            ]),
            TraceRecord::Samples { names } => {
                fields.extend(["samples".to_string(), names.join(":")])
            }
            TraceRecord::Combo {
                genotypes,
                ln_data_likelihood,
                ln_prior,
                ln_prior_g_af,
                ln_prior_af,
                score,
                posterior,
            } => {
                fields.extend(["genotypecombo".to_string(), genotypes]);
                fields.extend(
                    [ln_data_likelihood, ln_prior, ln_prior_g_af, ln_prior_af, score, posterior]
                        .iter()
                        .map(f64::to_string),
                );
            }
            TraceRecord::Normalizer { ln_normalizer } => fields.extend([
                "posterior_normalizer".to_string(),
                ln_normalizer.to_string(),
            ]),
        }
        self.write(&fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::AlleleType;

    #[test]
    fn csv_trace_uses_one_based_positions() {
        let mut trace = CsvTrace::new(Vec::new());
        let allele = Allele::new(AlleleType::Snp, "T", 1, "read7", 31, 59);
        trace
            .record("chr2", 99, TraceRecord::Allele { sample: "s1", allele: &allele })
            .unwrap();
        trace
            .record("chr2", 99, TraceRecord::Normalizer { ln_normalizer: -1.5 })
            .unwrap();
        let text = String::from_utf8(trace.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "chr2,100,allele,s1,read7,T,31,59");
        assert_eq!(lines[1], "chr2,100,posterior_normalizer,-1.5");
    }

    #[test]
    fn combo_records_keep_field_layout() {
        let mut trace = CsvTrace::new(Vec::new());
        trace
            .record(
                "chr1",
                0,
                TraceRecord::Combo {
                    genotypes: "A/T|?".to_string(),
                    ln_data_likelihood: -2.0,
                    ln_prior: -1.0,
                    ln_prior_g_af: 0.0,
                    ln_prior_af: -1.0,
                    score: -3.0,
                    posterior: 0.5,
                },
            )
            .unwrap();
        let allele = Allele::new(AlleleType::Snp, "G", 1, "read,1", 20, 30);
        trace
            .record("chr1", 0, TraceRecord::Allele { sample: "s1", allele: &allele })
            .unwrap();
        let text = String::from_utf8(trace.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "chr1,1,genotypecombo,A/T|?,-2,-1,0,-1,-3,0.5");
        assert_eq!(lines[1], "chr1,1,allele,s1,\"read,1\",G,20,30");
    }

    #[test]
    fn null_trace_is_disabled() {
        let mut trace = NullTrace;
        assert!(!trace.enabled());
        assert!(trace
            .record("chr1", 0, TraceRecord::Normalizer { ln_normalizer: 0.0 })
            .is_ok());
    }
}
