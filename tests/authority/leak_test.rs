//! The authority never leaves the kernel inside any payload.

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use actuation_kernel::audit::{AuditError, AuditLog, EntryType};
use actuation_kernel::authority::{assert_no_leaks_in, SovereignAuthority};
use actuation_kernel::canonical::Canonicalizer;
use actuation_kernel::kernel::KernelError;

use crate::support;

#[derive(Serialize)]
struct NetworkMessage<'a> {
    topic: &'static str,
    body: Vec<Attachment<'a>>,
}

#[derive(Serialize)]
enum Attachment<'a> {
    Text(String),
    Signer(&'a SovereignAuthority),
}

fn authority() -> SovereignAuthority {
    SovereignAuthority::from_seed(Uuid::new_v5(&Uuid::NAMESPACE_OID, b"leak"), 5)
}

#[test]
fn nested_authority_is_detected() {
    let authority = authority();
    let msg = NetworkMessage {
        topic: "status",
        body: vec![Attachment::Text("hello".into()), Attachment::Signer(&authority)],
    };
    let err = assert_no_leaks_in(&msg).expect_err("leak");
    assert!(err.detail.contains("embedded"));
}

#[test]
fn message_without_authority_is_clean() {
    let msg = NetworkMessage {
        topic: "status",
        body: vec![Attachment::Text("hello".into())],
    };
    assert!(assert_no_leaks_in(&msg).is_ok());
}

#[test]
fn audit_append_refuses_authority() {
    let authority = authority();
    let mut log = AuditLog::new(Uuid::nil(), Canonicalizer::default());
    log.append(EntryType::Decision, 1, &json!({"ok": true}))
        .expect("clean payload");
    let err = log
        .append(EntryType::Decision, 2, &vec![&authority])
        .map(|_| ())
        .expect_err("leak");
    assert!(matches!(err, AuditError::Leak(_)));
    assert_eq!(log.len(), 1);
    assert!(log.verify_chain().is_ok());
}

#[test]
fn kernel_export_records_violation() {
    let mut kernel = support::kernel(11);
    let authority = authority();
    kernel
        .prepare_export(&json!({"note": "fine"}), 1)
        .expect("clean payload");
    let err = kernel
        .prepare_export(&vec![&authority], 2)
        .expect_err("leak");
    assert!(matches!(err, KernelError::Sovereignty(_)));
    let entries = kernel.audit_log().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_type, EntryType::SovereigntyViolation);
}

#[test]
fn certificate_export_is_clean() {
    let mut kernel = support::kernel(12);
    let pending = support::pending_move(&mut kernel);
    let cert = kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect("certificate");
    let exported = kernel.prepare_export(&cert, 4).expect("clean export");
    assert!(exported.get("binding").is_some());
    assert!(kernel.export_audit_jsonl(Vec::new()).is_ok());
}
