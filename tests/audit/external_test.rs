//! Kernel telemetry only carries whitelisted fields.

use serde_json::json;

use actuation_kernel::audit::external::LeakMode;
use actuation_kernel::kernel::{Kernel, KernelError};

use crate::support;

fn kernel_with(mode: LeakMode) -> Kernel {
    let mut config = support::seeded_config(41);
    config.external_log.mode = mode;
    Kernel::new(config)
}

#[test]
fn happy_path_emits_three_clean_events() {
    let mut kernel = kernel_with(LeakMode::Strict);
    let pending = support::pending_move(&mut kernel);
    kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect("certificate");
    assert_eq!(kernel.external_log().emitted(), 3);
    assert!(kernel.external_log().attempts().is_empty());
}

#[test]
fn rejection_emits_a_decision_event() {
    let mut kernel = kernel_with(LeakMode::Strict);
    let pending = support::pending_move(&mut kernel);
    kernel
        .verify_and_issue_certificate(pending.request(1))
        .expect_err("k4");
    assert_eq!(kernel.external_log().emitted(), 3);
    assert!(kernel.external_log().attempts().is_empty());
}

#[test]
fn strict_mode_refuses_foreign_field() {
    let mut kernel = kernel_with(LeakMode::Strict);
    let err = kernel
        .emit_external("note", &[("decision", json!("admit")), ("nonce", json!("abc"))])
        .expect_err("strict");
    let KernelError::LogLeak(leak) = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(leak.field, "nonce");
    assert_eq!(kernel.external_log().emitted(), 0);
    assert_eq!(kernel.external_log().attempts().len(), 1);
}

#[test]
fn permissive_mode_drops_and_records() {
    let mut kernel = kernel_with(LeakMode::Permissive);
    kernel
        .emit_external("note", &[("decision", json!("admit")), ("nonce", json!("abc"))])
        .expect("permissive");
    assert_eq!(kernel.external_log().emitted(), 1);
    let attempts = kernel.external_log().attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].mode, LeakMode::Permissive);
}
