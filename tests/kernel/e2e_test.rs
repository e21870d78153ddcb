//! Full commit, anchor, reveal and actuation run.

use actuation_kernel::audit::EntryType;
use actuation_kernel::kernel::KernelError;
use actuation_kernel::probe::Verdict;

use crate::support;

#[test]
fn happy_path_logs_five_entries_and_is_clean() {
    let mut kernel = support::kernel(70);
    let pending = support::pending_move(&mut kernel);
    let cert = kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect("certificate");

    let types: Vec<EntryType> = kernel.audit_log().entries().iter().map(|e| e.entry_type).collect();
    assert_eq!(
        types,
        vec![
            EntryType::Commit,
            EntryType::Anchor,
            EntryType::Reveal,
            EntryType::Decision,
            EntryType::Actuation,
        ]
    );
    assert!(kernel.enforce_k7().is_ok());
    assert!(kernel.verify_certificate(&cert).is_ok());

    let report = kernel.probe_report();
    assert_eq!(report.verdict, Verdict::Clean);
    assert_eq!(report.summary.total_probes, 4);
    assert_eq!(report.summary.clean, 4);
}

#[test]
fn certificate_fields_follow_the_request() {
    let mut kernel = support::kernel(71);
    let pending = support::pending_move(&mut kernel);
    let cert = kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect("certificate");

    assert_eq!(cert.kernel_id(), kernel.kernel_id());
    assert_eq!(cert.anchor(), &pending.anchor);
    assert_eq!(cert.commitment(), &pending.commitment);
    assert_eq!(cert.action().action_type, "move");
    assert_eq!(cert.binding().action_hash, cert.action().action_hash);
    assert_eq!(cert.env_digest(), support::ENV);
    assert_eq!(cert.policy_digest(), support::POLICY);
    assert_eq!(cert.issued_at(), 3);
    assert_eq!(
        cert.trace_digest(),
        kernel.canonicalizer().hash_value(&pending.trace).expect("digest")
    );
    assert_eq!(
        cert.request_digest(),
        kernel
            .canonicalizer()
            .hash_value(&pending.proposal["request"])
            .expect("digest")
    );
}

#[test]
fn certificate_from_another_kernel_is_refused() {
    let mut issuer = support::kernel(72);
    let pending = support::pending_move(&mut issuer);
    let cert = issuer
        .verify_and_issue_certificate(pending.request(3))
        .expect("certificate");

    let other = support::kernel(73);
    let err = other.verify_certificate(&cert).expect_err("foreign");
    assert!(matches!(err, KernelError::InvalidCertificate { reason: "binding" }));
}

#[test]
fn audit_export_verifies_offline() {
    let mut kernel = support::kernel(74);
    let pending = support::pending_move(&mut kernel);
    kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect("certificate");

    let mut buf = Vec::new();
    kernel.export_audit_jsonl(&mut buf).expect("export");
    let entries = actuation_kernel::audit::read_jsonl(buf.as_slice()).expect("import");
    assert_eq!(entries, kernel.export_audit());
    assert!(actuation_kernel::audit::enforce_k7_on(&entries, kernel.canonicalizer()).is_ok());
}
