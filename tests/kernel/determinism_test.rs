//! Seeded runs replay byte for byte.

use actuation_kernel::demo::run_demo;
use actuation_kernel::probe::Verdict;

use crate::support;

#[test]
fn same_seed_same_chain_and_certificate() {
    let first = run_demo(support::seeded_config(90)).expect("first run");
    let second = run_demo(support::seeded_config(90)).expect("second run");
    assert_eq!(first.entries, second.entries);
    assert_eq!(first.certificate, second.certificate);
    assert_eq!(first.report, second.report);
    assert_eq!(first.report.verdict, Verdict::Clean);
}

#[test]
fn different_seed_different_chain() {
    let first = run_demo(support::seeded_config(90)).expect("first run");
    let second = run_demo(support::seeded_config(91)).expect("second run");
    assert_ne!(first.certificate, second.certificate);
    assert_ne!(
        first.entries.last().map(|e| e.entry_hash.clone()),
        second.entries.last().map(|e| e.entry_hash.clone())
    );
}

#[test]
fn unseeded_kernels_differ() {
    let a = actuation_kernel::kernel::Kernel::new(actuation_kernel::config::KernelConfig::default());
    let b = actuation_kernel::kernel::Kernel::new(actuation_kernel::config::KernelConfig::default());
    assert_eq!(a.kernel_id(), b.kernel_id());
    assert_ne!(a.public_key(), b.public_key());
}
