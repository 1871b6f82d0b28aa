use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bayescall::genomics::{
    AlleleSource, AlleleType, AlleleTypes, CallRenderer, CsvTrace, NullHypothesis, NullTrace,
    ObservationFileSource, PloidyMap, SiteCaller, TargetRegions, TraceSink,
};
use bayescall::CallerConfig;

#[derive(Parser, Debug)]
#[command(name = "bayescall", about = "Bayesian multi-sample per-site variant caller")]
struct Cli {
    /// Enable debug logging (per-position decisions).
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (stage-level progress).
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Call variants from a tab-separated allele observation table.
    Call(CallArgs),
}

#[derive(Args, Debug)]
struct CallArgs {
    /// Observation table (`chrom pos ref sample read type bases bq mq`), `-` for stdin.
    observations: PathBuf,
    /// VCF output (default: stdout).
    #[arg(long)]
    vcf: Option<PathBuf>,
    /// JSON lines output, one record per called site.
    #[arg(long)]
    json: Option<PathBuf>,
    /// BED output of alternates at sites below the pVar threshold.
    #[arg(long)]
    failed: Option<PathBuf>,
    /// CSV trace of every intermediate quantity.
    #[arg(long)]
    trace: Option<PathBuf>,
    /// BED file restricting calls to target regions.
    #[arg(long)]
    targets: Option<PathBuf>,

    /// Default sample ploidy.
    #[arg(long, default_value_t = 2)]
    ploidy: u32,
    /// Per-sample ploidy override, `name=ploidy`; repeatable.
    #[arg(long = "sample-ploidy", value_parser = parse_sample_ploidy)]
    sample_ploidy: Vec<(String, u32)>,
    /// Treat samples as pools; sample ploidy is then the number of pooled copies.
    #[arg(long)]
    pooled: bool,
    /// Divisor of the genotype-given-frequency prior in pooled mode.
    #[arg(long, default_value_t = 1.0)]
    diffusion_prior_scalar: f64,

    /// Allele types admitted as candidates, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "snp")]
    allele_types: Vec<AlleleType>,
    /// Minimum alternate observations in one sample.
    #[arg(long, default_value_t = 1)]
    min_alt_count: u32,
    /// Minimum alternate fraction in one sample.
    #[arg(long, default_value_t = 0.0)]
    min_alt_fraction: f64,
    /// Minimum base quality of a supporting observation.
    #[arg(long, default_value_t = 0)]
    min_base_quality: u8,
    /// Minimum mapping quality of a supporting observation.
    #[arg(long, default_value_t = 0)]
    min_mapping_quality: u8,

    /// Per-sample band width.
    #[arg(long, default_value_t = 2)]
    band_width: usize,
    /// Total band depth across samples.
    #[arg(long, default_value_t = 2)]
    band_depth: usize,
    /// Cap on banded combinations (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    step_max: usize,
    /// Population mutation rate.
    #[arg(long, default_value_t = 1e-3)]
    theta: f64,
    /// Keep at most this many combinations in the posterior (0 = all).
    #[arg(long, default_value_t = 0)]
    posterior_integration_depth: usize,
    /// Report sites with pVar at or above this value.
    #[arg(long, default_value_t = 1e-4)]
    pvar: f64,
    /// Read dependence factor in [0, 1].
    #[arg(long, default_value_t = 0.9)]
    read_dependence_factor: f64,
    /// Ignore mapping quality in per-read confidence.
    #[arg(long)]
    ignore_mapping_quality: bool,
    /// Combinations counted as "no variation" in pVar.
    #[arg(long, value_enum, default_value_t = NullArg::Monomorphic)]
    null_hypothesis: NullArg,
    /// Emit one VCF record per alternate of the best combination.
    #[arg(long)]
    report_all_alternates: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum NullArg {
    Monomorphic,
    HomozygousReference,
}

impl From<NullArg> for NullHypothesis {
    fn from(arg: NullArg) -> Self {
        match arg {
            NullArg::Monomorphic => NullHypothesis::Monomorphic,
            NullArg::HomozygousReference => NullHypothesis::HomozygousReference,
        }
    }
}

fn parse_sample_ploidy(value: &str) -> Result<(String, u32), String> {
    let (name, ploidy) = value
        .rsplit_once('=')
        .ok_or_else(|| format!("expected name=ploidy, got '{value}'"))?;
    let ploidy = ploidy
        .parse()
        .map_err(|err| format!("invalid ploidy in '{value}': {err}"))?;
    Ok((name.to_string(), ploidy))
}

impl CallArgs {
    fn config(&self) -> CallerConfig {
        let allowed_types = self
            .allele_types
            .iter()
            .fold(AlleleTypes::reference_only(), |types, &t| types.with(t));
        let mut config = CallerConfig {
            min_alt_count: self.min_alt_count,
            min_alt_fraction: self.min_alt_fraction,
            allowed_types,
            min_base_quality: self.min_base_quality,
            min_mapping_quality: self.min_mapping_quality,
            use_mapping_quality: !self.ignore_mapping_quality,
            report_all_alternates: self.report_all_alternates,
            ..CallerConfig::default()
        }
        .with_banding(self.band_width, self.band_depth, self.step_max)
        .with_theta(self.theta)
        .with_integration_depth(self.posterior_integration_depth)
        .with_pvar_threshold(self.pvar)
        .with_read_dependence(self.read_dependence_factor)
        .with_null_hypothesis(self.null_hypothesis.into());
        if self.pooled {
            config = config.with_pooled(self.diffusion_prior_scalar);
        }
        config
    }

    fn ploidy_map(&self) -> PloidyMap {
        self.sample_ploidy
            .iter()
            .fold(PloidyMap::new(self.ploidy), |map, (name, ploidy)| {
                map.with_sample(name.as_str(), *ploidy)
            })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match cli.command {
        Commands::Call(args) => run_call(&args)?,
    }

    Ok(())
}

fn init_logging(cli: &Cli) {
    let fallback = if cli.verbose {
        "trace"
    } else if cli.debug {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn run_call(args: &CallArgs) -> Result<()> {
    let config = args.config();
    let mut caller =
        SiteCaller::new(config.clone(), args.ploidy_map()).context("invalid caller settings")?;

    let mut source = ObservationFileSource::new(open_input(&args.observations)?)
        .with_context(|| format!("failed to read header of {}", args.observations.display()))?;
    if let Some(path) = &args.targets {
        let targets = TargetRegions::from_bed(open_input(path)?)
            .with_context(|| format!("failed to parse targets {}", path.display()))?;
        if targets.is_empty() {
            warn!(path = %path.display(), "target file has no regions; every site is skipped");
        }
        source = source.with_targets(targets);
    }

    let mut json = args.json.as_deref().map(create_output).transpose()?;
    let mut failed = args.failed.as_deref().map(create_output).transpose()?;
    let mut csv_trace;
    let mut null_trace = NullTrace;
    let trace: &mut dyn TraceSink = match &args.trace {
        Some(path) => {
            csv_trace = CsvTrace::new(create_output(path)?);
            &mut csv_trace
        }
        None => &mut null_trace,
    };

    // sample columns are only final once the whole table has been read
    let mut renderer = CallRenderer::new(Vec::new(), config.pvar_threshold)
        .with_all_alternates(config.report_all_alternates);
    let mut reportable = Vec::new();
    while let Some(site) = source.next_site().context("failed to read observations")? {
        let outcome = caller.call_site_with_samples(&site, source.sample_names(), trace)?;
        let Some(call) = outcome.into_call() else {
            continue;
        };
        if let Some(out) = json.as_mut() {
            renderer.write_json(out, &call).context("failed to write JSON output")?;
        }
        if let Some(out) = failed.as_mut() {
            renderer.write_failed(out, &call).context("failed to write failed-site output")?;
        }
        if renderer.is_reportable(&call) {
            reportable.push(call);
        }
    }

    let samples: Vec<Arc<str>> = source.sample_names().to_vec();
    renderer = CallRenderer::new(samples, config.pvar_threshold)
        .with_all_alternates(config.report_all_alternates);
    let mut vcf: Box<dyn Write> = match &args.vcf {
        Some(path) => Box::new(create_output(path)?),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    renderer.write_header(&mut vcf).context("failed to write VCF header")?;
    let mut records = 0;
    for call in &reportable {
        records += renderer
            .write_vcf_records(&mut vcf, call)
            .context("failed to write VCF record")?;
    }
    vcf.flush().context("failed to flush VCF output")?;
    for out in [json.as_mut(), failed.as_mut()].into_iter().flatten() {
        out.flush().context("failed to flush output")?;
    }
    trace.flush().context("failed to flush trace output")?;

    caller.log_summary();
    info!(records, "wrote VCF records");
    if caller.statistics().total_sites == 0 {
        warn!(path = %args.observations.display(), "no sites in input");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_args(extra: &[&str]) -> CallArgs {
        let argv = ["bayescall", "call", "obs.tsv"].into_iter().chain(extra.iter().copied());
        match Cli::try_parse_from(argv).expect("arguments parse").command {
            Commands::Call(args) => args,
        }
    }

    #[test]
    fn defaults_match_library_defaults() {
        assert_eq!(call_args(&[]).config(), CallerConfig::default());
    }

    #[test]
    fn flags_map_onto_config() {
        let args = call_args(&[
            "--allele-types",
            "snp,ins",
            "--pooled",
            "--diffusion-prior-scalar",
            "2",
            "--band-width",
            "3",
            "--null-hypothesis",
            "homozygous-reference",
            "--sample-ploidy",
            "pool1=8",
        ]);
        let config = args.config();
        assert!(config.allowed_types.contains(AlleleType::Insertion));
        assert!(!config.allowed_types.contains(AlleleType::Deletion));
        assert!(config.pooled);
        assert_eq!(config.diffusion_prior_scalar, 2.0);
        assert_eq!(config.band_width, 3);
        assert_eq!(config.null_hypothesis, NullHypothesis::HomozygousReference);
        assert_eq!(args.ploidy_map().ploidy_of("pool1"), 8);
        assert_eq!(args.ploidy_map().ploidy_of("other"), 2);
    }

    #[test]
    fn malformed_sample_ploidy_is_rejected() {
        assert!(parse_sample_ploidy("nameonly").is_err());
        assert!(parse_sample_ploidy("s=x").is_err());
        assert_eq!(parse_sample_ploidy("a=b=4"), Ok(("a=b".to_string(), 4)));
    }
}
