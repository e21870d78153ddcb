//! Gate outcomes for each invariant, in the order the gate checks them.

use serde_json::{json, Value};

use actuation_kernel::acv::{CouplingInput, CouplingPattern, CouplingWitness};
use actuation_kernel::audit::EntryType;
use actuation_kernel::authority::LEAK_SENTINEL;
use actuation_kernel::budget::BudgetError;
use actuation_kernel::kernel::{InvariantCode, Kernel, KernelError, RevealRequest, ViolationTag};
use actuation_kernel::probe::{ProbeKind, Severity, Verdict};

use crate::support::{self, Pending};

fn assert_violation(err: &KernelError, code: InvariantCode, tag: ViolationTag) {
    assert_eq!(err.invariant_code(), Some(code), "unexpected error: {err}");
    assert_eq!(err.violation_tag(), Some(tag), "unexpected error: {err}");
}

fn entry_types(kernel: &Kernel) -> Vec<EntryType> {
    kernel.audit_log().entries().iter().map(|e| e.entry_type).collect()
}

fn node_hashes(kernel: &Kernel, trace: &[Value]) -> Vec<String> {
    trace
        .iter()
        .map(|n| kernel.canonicalizer().hash_value(n).expect("node hash"))
        .collect()
}

fn with_pattern(pattern: CouplingPattern) -> Kernel {
    let mut config = support::seeded_config(51);
    config.coupling.pattern = pattern;
    Kernel::new(config)
}

fn delegated(kernel: &mut Kernel, links: usize) -> Pending {
    let trace = support::trace(2);
    let mut proposal = support::proposal("query", json!({"q": "status"}), &trace);
    let chain: Vec<Value> = (1..=links)
        .map(|depth| json!({"from": format!("agent-{depth}"), "depth": depth}))
        .collect();
    proposal["delegation_chain"] = Value::Array(chain);
    support::commit_and_anchor(kernel, proposal, trace, 1, 2)
}

#[test]
fn reveal_before_anchor_is_k4() {
    let mut kernel = support::kernel(50);
    let trace = support::trace(2);
    let proposal = support::proposal("move", json!({"direction": "east"}), &trace);
    let pending = support::commit_and_anchor(&mut kernel, proposal, trace, 100, 50);

    let err = kernel
        .verify_and_issue_certificate(pending.request(200))
        .expect_err("k4");
    assert_violation(&err, InvariantCode::K4, ViolationTag::TemporalOrder);
    assert_eq!(
        entry_types(&kernel),
        vec![
            EntryType::Commit,
            EntryType::Anchor,
            EntryType::Reveal,
            EntryType::InvariantViolation,
            EntryType::Decision,
        ]
    );
    assert_eq!(kernel.snapshot().anchors_used, 0);
}

#[test]
fn equal_timestamps_are_k4() {
    let mut kernel = support::kernel(50);
    let pending = support::pending_move(&mut kernel);
    let err = kernel
        .verify_and_issue_certificate(pending.request(2))
        .expect_err("k4");
    assert_violation(&err, InvariantCode::K4, ViolationTag::TemporalOrder);
}

#[test]
fn swapped_proposal_is_k5() {
    let mut kernel = support::kernel(52);
    let pending = support::pending_move(&mut kernel);
    let other = support::proposal("move", json!({"direction": "south"}), &pending.trace);
    let req = RevealRequest {
        proposal: &other,
        ..pending.request(3)
    };
    let err = kernel.verify_and_issue_certificate(req).expect_err("k5");
    assert_violation(&err, InvariantCode::K5, ViolationTag::CommitmentMismatch);
    assert_eq!(kernel.snapshot().bindings_issued, 0);
}

#[test]
fn wrong_nonce_is_k5() {
    let mut kernel = support::kernel(52);
    let pending = support::pending_move(&mut kernel);
    let req = RevealRequest {
        revealed_nonce: "not-the-nonce",
        ..pending.request(3)
    };
    let err = kernel.verify_and_issue_certificate(req).expect_err("k5");
    assert_violation(&err, InvariantCode::K5, ViolationTag::CommitmentMismatch);
}

#[test]
fn anchor_of_another_commitment_is_k5() {
    let mut kernel = support::kernel(53);
    let first = support::pending_move(&mut kernel);
    let trace = support::trace(1);
    let proposal = support::proposal("wait", json!({}), &trace);
    let second = support::commit_and_anchor(&mut kernel, proposal, trace, 4, 5);

    let req = RevealRequest {
        anchor: &second.anchor,
        ..first.request(6)
    };
    let err = kernel.verify_and_issue_certificate(req).expect_err("k5");
    assert_violation(&err, InvariantCode::K5, ViolationTag::UnknownAnchor);
}

#[test]
fn anchor_reuse_is_k5_and_probed() {
    let mut kernel = support::kernel(54);
    let pending = support::pending_move(&mut kernel);
    kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect("first reveal");

    let err = kernel
        .verify_and_issue_certificate(pending.request(4))
        .expect_err("reuse");
    assert_violation(&err, InvariantCode::K5, ViolationTag::AnchorReuse);
    assert_eq!(kernel.snapshot().anchors_used, 1);

    let report = kernel.probe_report();
    let reuse = report.probe(ProbeKind::AnchorReuse).expect("probe");
    assert!(reuse.detected);
    assert_eq!(reuse.severity, Severity::Violation);
    assert_eq!(report.verdict, Verdict::Violation);
    assert!(kernel.enforce_k7().is_ok());
}

#[test]
fn swapped_trace_is_k6() {
    let mut kernel = support::kernel(55);
    let pending = support::pending_move(&mut kernel);
    let swapped = support::trace(3);
    let req = RevealRequest {
        trace_nodes: &swapped,
        ..pending.request(3)
    };
    let err = kernel.verify_and_issue_certificate(req).expect_err("k6");
    assert_violation(&err, InvariantCode::K6, ViolationTag::TraceSwap);
    assert_eq!(kernel.snapshot().anchors_used, 0);
}

#[test]
fn environment_change_is_k6() {
    let mut kernel = support::kernel(56);
    let pending = support::pending_move(&mut kernel);
    let req = RevealRequest {
        env_digest: "env:moved",
        ..pending.request(3)
    };
    let err = kernel.verify_and_issue_certificate(req).expect_err("k6");
    assert_violation(&err, InvariantCode::K6, ViolationTag::EnvMismatch);
}

#[test]
fn witness_of_another_pattern_is_k6() {
    let mut kernel = with_pattern(CouplingPattern::A);
    let pending = support::pending_move(&mut kernel);
    let hashes = node_hashes(&kernel, &pending.trace);
    let witness = CouplingWitness::generate(
        CouplingPattern::B,
        CouplingInput {
            node_hashes: &hashes,
            anchor_hash: &pending.anchor.anchor_hash,
            env_digest: support::ENV,
        },
        0,
    )
    .expect("witness");
    let req = RevealRequest {
        witness: Some(&witness),
        ..pending.request(3)
    };
    let err = kernel.verify_and_issue_certificate(req).expect_err("k6");
    assert_violation(&err, InvariantCode::K6, ViolationTag::WitnessMismatch);
}

#[test]
fn supplied_matching_witness_is_accepted() {
    let mut kernel = with_pattern(CouplingPattern::A);
    let pending = support::pending_move(&mut kernel);
    let hashes = node_hashes(&kernel, &pending.trace);
    let openings = kernel.config().coupling.merkle_openings;
    let witness = CouplingWitness::generate(
        CouplingPattern::A,
        CouplingInput {
            node_hashes: &hashes,
            anchor_hash: &pending.anchor.anchor_hash,
            env_digest: support::ENV,
        },
        openings,
    )
    .expect("witness");
    let req = RevealRequest {
        witness: Some(&witness),
        ..pending.request(3)
    };
    let cert = kernel.verify_and_issue_certificate(req).expect("admitted");
    assert_eq!(cert.witness(), &witness);
}

#[test]
fn every_pattern_admits_a_clean_proposal() {
    for pattern in [CouplingPattern::A, CouplingPattern::B, CouplingPattern::C] {
        let mut kernel = with_pattern(pattern);
        let pending = support::pending_move(&mut kernel);
        let cert = kernel
            .verify_and_issue_certificate(pending.request(3))
            .expect("admitted");
        assert_eq!(cert.witness().pattern(), pattern);
    }
}

#[test]
fn delegation_within_limit_is_admitted() {
    let mut kernel = support::kernel(57);
    let pending = delegated(&mut kernel, 2);
    kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect("depth 2");
    let actuation = kernel.audit_log().entries().last().expect("entry");
    assert_eq!(actuation.entry_type, EntryType::Actuation);
    assert_eq!(actuation.payload["delegation_depth"], 2);
}

#[test]
fn delegation_beyond_limit_is_k6_and_probed() {
    let mut kernel = support::kernel(58);
    let pending = delegated(&mut kernel, 3);
    let err = kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect_err("depth 3");
    assert_violation(&err, InvariantCode::K6, ViolationTag::DelegationDepth);
    let KernelError::Invariant(violation) = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(violation.delegation_depth, Some(3));

    let laundering = kernel.probe_report();
    let probe = laundering.probe(ProbeKind::DelegationLaundering).expect("probe");
    assert!(probe.detected);
    assert_eq!(probe.severity, Severity::Violation);
}

#[test]
fn inconsistent_delegation_metadata_is_k6() {
    let mut kernel = support::kernel(59);
    let trace = support::trace(1);
    let mut proposal = support::proposal("query", json!({}), &trace);
    proposal["delegation_chain"] = json!([{"from": "a", "depth": 2}]);
    let pending = support::commit_and_anchor(&mut kernel, proposal, trace, 1, 2);
    let err = kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect_err("inconsistent");
    assert_violation(&err, InvariantCode::K6, ViolationTag::DelegationChainInconsistent);
}

#[test]
fn oversized_trace_abstains() {
    let mut config = support::seeded_config(60);
    config.budget.max_nodes = 10;
    let mut kernel = Kernel::new(config);
    let trace = support::trace(11);
    let proposal = support::proposal("move", json!({"direction": "west"}), &trace);
    let pending = support::commit_and_anchor(&mut kernel, proposal, trace, 1, 2);

    let err = kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect_err("abstain");
    assert!(err.is_abstention());
    assert!(matches!(
        err,
        KernelError::Budget(BudgetError::NodeBudgetExceeded { used: 11, limit: 10 })
    ));
    assert_eq!(err.reason_code(), "BUDGET_NODE");

    let entries = kernel.audit_log().entries();
    let abstention = entries
        .iter()
        .find(|e| e.entry_type == EntryType::Abstention)
        .expect("abstention");
    assert_eq!(abstention.payload["budget_kind"], "node");
    assert_eq!(kernel.snapshot().anchors_used, 0);
}

#[test]
fn ten_nodes_fit_the_same_budget() {
    let mut config = support::seeded_config(60);
    config.budget.max_nodes = 10;
    let mut kernel = Kernel::new(config);
    let trace = support::trace(10);
    let proposal = support::proposal("move", json!({"direction": "west"}), &trace);
    let pending = support::commit_and_anchor(&mut kernel, proposal, trace, 1, 2);
    kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect("within budget");
    assert_eq!(kernel.budget_state().nodes, 10);
}

#[test]
fn authority_marker_in_arguments_is_rejected_without_consuming_anchor() {
    let mut kernel = support::kernel(62);
    let trace = support::trace(2);
    let proposal = support::proposal("move", json!({"note": LEAK_SENTINEL}), &trace);
    let pending = support::commit_and_anchor(&mut kernel, proposal, trace, 1, 2);

    let err = kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect_err("leak");
    assert!(matches!(err, KernelError::Sovereignty(_)));
    assert_eq!(
        entry_types(&kernel),
        vec![
            EntryType::Commit,
            EntryType::Anchor,
            EntryType::Reveal,
            EntryType::SovereigntyViolation,
            EntryType::Decision,
        ]
    );
    let decision = kernel.audit_log().entries().last().expect("decision");
    assert_eq!(decision.payload["decision"], "reject");
    assert_eq!(decision.payload["reason"], "SOVEREIGNTY");
    assert_eq!(kernel.snapshot().anchors_used, 0);

    let again = kernel
        .verify_and_issue_certificate(pending.request(4))
        .expect_err("still leaking");
    assert!(matches!(again, KernelError::Sovereignty(_)));
    kernel.enforce_k7().expect("chain intact");
}
