//! Hardened, soft and strict handling of smuggled authority.

use serde_json::json;

use actuation_kernel::audit::EntryType;
use actuation_kernel::kernel::{Kernel, KernelError};
use actuation_kernel::recomposer::{RecomposerMode, RecompositionError, RecompositionErrorCode};

use crate::support::{self, Pending};

fn kernel_in(mode: RecomposerMode) -> Kernel {
    let mut config = support::seeded_config(21);
    config.recomposer.mode = mode;
    Kernel::new(config)
}

fn smuggling(kernel: &mut Kernel) -> Pending {
    let trace = support::trace(2);
    let proposal = support::proposal(
        "write",
        json!({"path": "/tmp/out", "authority_token": "granted-by-operator"}),
        &trace,
    );
    support::commit_and_anchor(kernel, proposal, trace, 1, 2)
}

#[test]
fn hardened_rejects_before_binding() {
    let mut kernel = kernel_in(RecomposerMode::Hardened);
    let pending = smuggling(&mut kernel);
    let err = kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect_err("markers");

    let KernelError::Recomposition(RecompositionError::DelegationAuthority { markers }) = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].field, "authority_token");
    assert_eq!(err.reason_code(), "DELEGATION_AUTHORITY");

    let snapshot = kernel.snapshot();
    assert_eq!(snapshot.bindings_issued, 0);
    assert_eq!(snapshot.anchors_used, 0);

    let rejected = kernel
        .audit_log()
        .entries()
        .iter()
        .find(|e| e.entry_type == EntryType::RecompositionRejected)
        .expect("rejection entry");
    assert_eq!(rejected.payload["error_code"], "DELEGATION_AUTHORITY");
    assert_eq!(rejected.payload["marker_count"], 1);
    let decision = kernel.audit_log().entries().last().expect("decision");
    assert_eq!(decision.entry_type, EntryType::Decision);
    assert_eq!(decision.payload["decision"], "reject");
}

#[test]
fn soft_admits_and_strips_the_marker() {
    let mut kernel = kernel_in(RecomposerMode::Soft);
    let pending = smuggling(&mut kernel);
    let cert = kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect("soft mode admits");
    assert_eq!(cert.action().action_type, "write");
    assert_eq!(cert.action().action_args, json!({"path": "/tmp/out"}));
    assert!(kernel.verify_certificate(&cert).is_ok());
}

#[test]
fn strict_rejects_unknown_top_level_member() {
    let mut kernel = kernel_in(RecomposerMode::Strict);
    let trace = support::trace(1);
    let mut proposal = support::proposal("read", json!({"path": "/etc/motd"}), &trace);
    proposal["sidecar"] = json!({"note": "extra"});
    let pending = support::commit_and_anchor(&mut kernel, proposal, trace, 1, 2);

    let err = kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect_err("strict");
    let KernelError::Recomposition(inner) = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(inner.code(), Some(RecompositionErrorCode::ProposalParse));
}

#[test]
fn disallowed_action_type_is_reconstruction_error() {
    let mut kernel = kernel_in(RecomposerMode::Hardened);
    let trace = support::trace(1);
    let proposal = support::proposal("format_disk", json!({}), &trace);
    let pending = support::commit_and_anchor(&mut kernel, proposal, trace, 1, 2);

    let err = kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect_err("not allow-listed");
    assert_eq!(err.reason_code(), "ACTION_RECONSTRUCTION");
    assert_eq!(kernel.snapshot().anchors_used, 0);
}
