//! One kernel shared across threads keeps a single ordered chain.

use serde_json::json;

use actuation_kernel::acv::{seeded_nonce, Commitment};
use actuation_kernel::kernel::{RevealRequest, SharedKernel};
use actuation_kernel::probe::Verdict;

use crate::support;

const WORKERS: u64 = 4;

fn run_worker(shared: &SharedKernel, worker: u64) {
    let trace = support::trace(2);
    let proposal = support::proposal("move", json!({"worker": worker}), &trace);
    let public_key = shared.public_key().expect("public key");
    let canon = shared.with(|k| k.canonicalizer().clone()).expect("canonicalizer");

    let nonce = seeded_nonce(worker, 0);
    let commitment = Commitment::create(&canon, &proposal, &nonce, &public_key, 1).expect("commit");
    shared
        .register_commitment(&commitment.registered())
        .expect("register");
    let anchor = shared
        .issue_anchor(&commitment.commitment_hash, support::ENV, 2)
        .expect("anchor");
    shared
        .verify_and_issue_certificate(RevealRequest {
            proposal: &proposal,
            commitment: &commitment,
            anchor: &anchor,
            revealed_nonce: &nonce,
            trace_nodes: &trace,
            env_digest: support::ENV,
            policy_digest: support::POLICY,
            reveal_timestamp: 3,
            witness: None,
        })
        .expect("certificate");
}

#[test]
fn concurrent_proposals_share_one_chain() {
    let shared = SharedKernel::new(support::kernel(100));
    std::thread::scope(|scope| {
        for worker in 0..WORKERS {
            let shared = shared.clone();
            scope.spawn(move || run_worker(&shared, worker));
        }
    });

    let entries = shared.export_audit().expect("export");
    assert_eq!(u64::try_from(entries.len()).expect("len"), WORKERS.saturating_mul(5));
    assert!(shared.with(|k| k.enforce_k7()).expect("lock").is_ok());
    assert_eq!(shared.probe_report().expect("report").verdict, Verdict::Clean);
}
