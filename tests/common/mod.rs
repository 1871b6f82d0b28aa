#![allow(dead_code)]

use std::sync::Arc;

use bayescall::genomics::{
    Allele, AlleleType, NullTrace, PloidyMap, Sample, SiteCall, SiteCaller, SiteObservations,
    SiteOutcome,
};
use bayescall::CallerConfig;

/// `reference` reads of `ref_base` followed by `alternate` SNP reads of `alt_base`.
pub fn reads(ref_base: &str, reference: usize, alt_base: &str, alternate: usize) -> Vec<Allele> {
    let refs = (0..reference)
        .map(|i| Allele::new(AlleleType::Reference, ref_base, 1, format!("ref{i}"), 30, 60));
    let alts = (0..alternate)
        .map(|i| Allele::new(AlleleType::Snp, alt_base, 1, format!("alt{i}"), 30, 60));
    refs.chain(alts).collect()
}

pub fn site(position: u32, reference_base: u8, samples: Vec<Sample>) -> SiteObservations {
    SiteObservations {
        chrom: Arc::from("chr1"),
        position,
        reference_base,
        samples,
        in_target: true,
    }
}

pub fn run_site(config: CallerConfig, site: &SiteObservations) -> SiteOutcome {
    let mut caller = SiteCaller::new(config, PloidyMap::default()).expect("valid configuration");
    caller
        .call_site(site, &mut NullTrace)
        .expect("inference succeeds")
}

pub fn call_site(config: CallerConfig, site: &SiteObservations) -> SiteCall {
    run_site(config, site)
        .into_call()
        .expect("site should not be skipped")
}
