//! Per-site inference benchmarks

use std::sync::Arc;

use bayescall::genomics::{
    Allele, AlleleType, NullTrace, PloidyMap, Sample, SiteCaller, SiteObservations,
};
use bayescall::CallerConfig;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn sample(name: &str, reference: usize, alternates: &[(&str, usize)]) -> Sample {
    let mut reads: Vec<Allele> = (0..reference)
        .map(|i| Allele::new(AlleleType::Reference, "A", 1, format!("r{i}"), 30, 60))
        .collect();
    for (base, count) in alternates {
        reads.extend(
            (0..*count).map(|i| Allele::new(AlleleType::Snp, base, 1, format!("{base}{i}"), 25, 60)),
        );
    }
    Sample::new(name, reads)
}

fn site(samples: usize) -> SiteObservations {
    SiteObservations {
        chrom: Arc::from("chr1"),
        position: 1_000,
        reference_base: b'A',
        samples: (0..samples)
            .map(|i| sample(&format!("s{i}"), 10 + i % 7, &[("T", i % 5), ("G", i % 2)]))
            .collect(),
        in_target: true,
    }
}

fn benchmark_call_site(c: &mut Criterion) {
    let mut group = c.benchmark_group("call_site");
    for samples in [1usize, 8, 32] {
        let site = site(samples);
        group.bench_with_input(BenchmarkId::from_parameter(samples), &site, |b, site| {
            let mut caller = SiteCaller::new(CallerConfig::default(), PloidyMap::default())
                .expect("valid configuration");
            b.iter(|| {
                let outcome = caller
                    .call_site(black_box(site), &mut NullTrace)
                    .expect("inference succeeds");
                black_box(outcome);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_call_site);
criterion_main!(benches);
