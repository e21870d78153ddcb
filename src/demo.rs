//! Reference end-to-end scenario.
//!
//! Commit, anchor and reveal one `move` proposal with a two-node trace, then
//! hand the certificate to an [`Actuator`]. Used by the `demo` subcommand and
//! by the determinism tests: with a seeded configuration two runs produce
//! byte-identical audit chains and certificates.

use serde_json::{json, Value};

use crate::acv::{seeded_nonce, Commitment};
use crate::actuator::Actuator;
use crate::audit::AuditEntry;
use crate::config::KernelConfig;
use crate::kernel::{Kernel, KernelError, RevealRequest};
use crate::probe::ProbeReport;
use crate::types::ActuationCertificate;

/// Environment digest used by the scenario.
pub const DEMO_ENV_DIGEST: &str = "env:grid-3x3:step-0";

/// Policy digest used by the scenario.
pub const DEMO_POLICY_DIGEST: &str = "policy:default";

/// Everything the scenario produced.
#[derive(Debug, Clone)]
pub struct DemoOutcome {
    /// The issued certificate.
    pub certificate: ActuationCertificate,
    /// Full audit chain.
    pub entries: Vec<AuditEntry>,
    /// Probe report over the run.
    pub report: ProbeReport,
}

/// The scenario's proposal.
#[must_use]
pub fn demo_proposal() -> (Value, Vec<Value>) {
    let trace = vec![
        json!({"step": 0, "thought": "goal is north-east", "observation": {"x": 0, "y": 0}}),
        json!({"step": 1, "thought": "move north first", "observation": {"x": 0, "y": 0}}),
    ];
    let proposal = json!({
        "request": {"intent": {"action": "move", "args": {"direction": "north", "steps": 1}}},
        "trace": {"nodes": trace},
    });
    (proposal, trace)
}

/// Run the scenario on a fresh kernel built from `config`.
///
/// The nonce is derived from `kernel.seed` when set (zero otherwise).
///
/// # Errors
///
/// Returns [`KernelError`] if any gate fails or the actuator refuses the
/// certificate.
pub fn run_demo(config: KernelConfig) -> Result<DemoOutcome, KernelError> {
    let seed = config.kernel.seed.unwrap_or(0);
    let canonical = config.canonical.clone();
    let mut kernel = Kernel::new(config);
    let (proposal, trace) = demo_proposal();

    let nonce = seeded_nonce(seed, 0);
    let commitment = Commitment::create(kernel.canonicalizer(), &proposal, &nonce, kernel.public_key(), 1)?;
    kernel.register_commitment(&commitment.registered())?;
    let anchor = kernel.issue_anchor(&commitment.commitment_hash, DEMO_ENV_DIGEST, 2)?;
    let certificate = kernel.verify_and_issue_certificate(RevealRequest {
        proposal: &proposal,
        commitment: &commitment,
        anchor: &anchor,
        revealed_nonce: &nonce,
        trace_nodes: &trace,
        env_digest: DEMO_ENV_DIGEST,
        policy_digest: DEMO_POLICY_DIGEST,
        reveal_timestamp: 3,
        witness: None,
    })?;

    let mut actuator = Actuator::new(canonical);
    actuator
        .admit(&certificate, kernel.verifier())
        .map_err(|e| {
            tracing::error!(error = %e, "actuator refused demo certificate");
            KernelError::InvalidCertificate { reason: "actuator" }
        })?;

    kernel.enforce_k7()?;
    Ok(DemoOutcome {
        report: kernel.probe_report(),
        entries: kernel.export_audit(),
        certificate,
    })
}
