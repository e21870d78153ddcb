//! Probe findings over live kernels and hand-built chains.

use serde_json::json;
use uuid::Uuid;

use actuation_kernel::audit::{AuditLog, EntryType};
use actuation_kernel::canonical::Canonicalizer;
use actuation_kernel::probe::{ProbeEngine, ProbeKind, Severity, Verdict};

use crate::support;

fn log() -> AuditLog {
    AuditLog::new(Uuid::nil(), Canonicalizer::default())
}

#[test]
fn unconsumed_anchor_is_a_warning_live_and_offline() {
    let mut kernel = support::kernel(110);
    let pending = support::pending_move(&mut kernel);

    let live = kernel.probe_report();
    let burial = live.probe(ProbeKind::AnchorBurial).expect("probe");
    assert!(burial.detected);
    assert_eq!(burial.severity, Severity::Warning);
    assert_eq!(burial.evidence.len(), 1);
    assert_eq!(burial.evidence[0]["anchor_id"], json!(pending.anchor.anchor_id));
    assert_eq!(live.verdict, Verdict::Warning);

    let offline = ProbeEngine::new(2).run(&kernel.export_audit(), None);
    assert_eq!(offline.verdict, Verdict::Warning);
    assert!(offline.probe(ProbeKind::AnchorBurial).expect("probe").detected);
}

#[test]
fn authority_export_attempt_is_a_violation() {
    let mut kernel = support::kernel(111);
    kernel.disable_gate(1).expect_err("refused");
    assert_eq!(kernel.probe_report().verdict, Verdict::Warning);

    kernel.request_authority_export(2).expect_err("refused");
    let report = kernel.probe_report();
    let temptation = report.probe(ProbeKind::BypassTemptation).expect("probe");
    assert_eq!(temptation.severity, Severity::Violation);
    assert_eq!(report.verdict, Verdict::Violation);
}

#[test]
fn double_actuation_of_one_anchor_is_reuse() {
    let mut log = log();
    let anchor_id = Uuid::new_v5(&Uuid::nil(), b"anchor");
    for ts in [1u64, 2] {
        log.append(
            EntryType::Actuation,
            ts,
            &json!({"anchor_id": anchor_id, "delegation_depth": 0, "chain_consistent": true}),
        )
        .expect("append");
    }
    let report = ProbeEngine::new(2).run(log.entries(), None);
    let reuse = report.probe(ProbeKind::AnchorReuse).expect("probe");
    assert!(reuse.detected);
    assert_eq!(reuse.evidence[0]["double_actuation"], true);
    assert_eq!(report.verdict, Verdict::Violation);
}

#[test]
fn admitted_deep_chain_is_laundering() {
    let mut log = log();
    log.append(
        EntryType::Actuation,
        1,
        &json!({"anchor_id": "a", "delegation_depth": 5, "chain_consistent": true}),
    )
    .expect("append");
    let strict = ProbeEngine::new(2).run(log.entries(), None);
    assert!(strict.probe(ProbeKind::DelegationLaundering).expect("probe").detected);

    let lenient = ProbeEngine::new(5).run(log.entries(), None);
    assert!(!lenient.probe(ProbeKind::DelegationLaundering).expect("probe").detected);
}

#[test]
fn report_summary_counts_match_probes() {
    let mut kernel = support::kernel(112);
    support::pending_move(&mut kernel);
    kernel.execute_raw(&json!({}), 3).expect_err("refused");
    let report = kernel.probe_report();
    assert_eq!(report.summary.total_probes, 4);
    assert_eq!(report.summary.warnings, 2);
    assert_eq!(report.summary.violations, 0);
    assert_eq!(report.summary.clean, 2);
}
