//! The actuator re-checks certificates on its own.

use actuation_kernel::actuator::{ActuationRejected, Actuator};
use actuation_kernel::config::CanonicalConfig;
use actuation_kernel::types::{ActuationCertificate, CertificateRecord};

use crate::support;

fn issued(seed: u64) -> (actuation_kernel::kernel::Kernel, ActuationCertificate) {
    let mut kernel = support::kernel(seed);
    let pending = support::pending_move(&mut kernel);
    let cert = kernel
        .verify_and_issue_certificate(pending.request(3))
        .expect("certificate");
    (kernel, cert)
}

#[test]
fn admits_once_then_refuses_replay() {
    let (kernel, cert) = issued(80);
    let mut actuator = Actuator::new(CanonicalConfig::default());
    let action = actuator.admit(&cert, kernel.verifier()).expect("admit");
    assert_eq!(&action, cert.action());
    assert_eq!(actuator.applied_count(), 1);

    let err = actuator.admit(&cert, kernel.verifier()).expect_err("replay");
    assert_eq!(
        err,
        ActuationRejected::Replay {
            certificate_id: cert.certificate_id()
        }
    );
    assert_eq!(actuator.applied_count(), 1);
}

#[test]
fn foreign_verifier_rejects_binding() {
    let (_, cert) = issued(81);
    let other = support::kernel(82);
    let mut actuator = Actuator::default();
    let err = actuator.admit(&cert, other.verifier()).expect_err("foreign");
    assert_eq!(err, ActuationRejected::InvalidBinding);
    assert_eq!(actuator.applied_count(), 0);
}

#[test]
fn edited_arguments_disagree_canonically() {
    let (kernel, cert) = issued(83);
    let mut json = serde_json::to_value(&cert).expect("serialize");
    json["action"]["action_args"]["direction"] = serde_json::json!("south");
    let tampered: CertificateRecord = serde_json::from_value(json).expect("deserialize");

    let mut actuator = Actuator::default();
    let err = actuator.admit_record(&tampered, kernel.verifier()).expect_err("tampered");
    assert!(matches!(err, ActuationRejected::CanonicalDisagreement { .. }));
    assert!(kernel.verify_record(&tampered).is_err());
}

#[test]
fn rehashed_action_fails_binding() {
    let (kernel, cert) = issued(84);
    let mut json = serde_json::to_value(&cert).expect("serialize");
    json["action"]["action_args"]["direction"] = serde_json::json!("south");
    let rehashed = actuation_kernel::types::RecomposedAction::compute_hash(
        kernel.canonicalizer(),
        "move",
        &json["action"]["action_args"],
    )
    .expect("hash");
    json["action"]["action_hash"] = serde_json::json!(rehashed);
    let forged: CertificateRecord = serde_json::from_value(json).expect("deserialize");

    let mut actuator = Actuator::default();
    let err = actuator.admit_record(&forged, kernel.verifier()).expect_err("forged");
    assert!(matches!(err, ActuationRejected::BindingMismatch { .. }));
}

#[test]
fn wire_record_of_genuine_certificate_is_accepted_once() {
    let (kernel, cert) = issued(85);
    let wire = serde_json::to_string(&cert).expect("serialize");
    let record: CertificateRecord = serde_json::from_str(&wire).expect("deserialize");
    assert_eq!(&record, cert.record());
    kernel.verify_record(&record).expect("genuine record verifies");

    let mut actuator = Actuator::default();
    actuator.admit_record(&record, kernel.verifier()).expect("admit");
    let err = actuator.admit(&cert, kernel.verifier()).expect_err("same certificate");
    assert!(matches!(err, ActuationRejected::Replay { .. }));
}

#[test]
fn wire_record_rejects_unknown_fields() {
    let (_, cert) = issued(86);
    let mut json = serde_json::to_value(&cert).expect("serialize");
    json["authorized"] = serde_json::json!(true);
    assert!(serde_json::from_value::<CertificateRecord>(json).is_err());
}
