//! Actuation gate.
//!
//! Composes the ACV checks, recomposition and coupling into the one path that
//! can produce an [`ActuationCertificate`]. Every failure is written to the
//! audit log before it propagates, and nothing before the final step marks
//! the anchor used.

use serde_json::{json, Value};

use super::error::{InvariantCode, InvariantViolation, KernelError, ViolationTag};
use super::Kernel;
use crate::acv::{compute_commitment_hash, nonce_ref, temporal_order_holds, Anchor, Commitment};
use crate::acv::{CouplingInput, CouplingWitness};
use crate::authority::ActuationSigner;
use crate::budget::OperationKind;
use crate::recomposer::{RecomposeContext, RecompositionError, RecompositionResult};
use crate::types::{ActuationCertificate, CertificateParts};

/// Everything a proposer hands over at reveal time.
#[derive(Debug, Clone, Copy)]
pub struct RevealRequest<'a> {
    /// Full proposal `{request:{intent:{action,args}}, trace?, delegation_chain?}`.
    pub proposal: &'a Value,
    /// The commitment being opened.
    pub commitment: &'a Commitment,
    /// The anchor the kernel issued for it.
    pub anchor: &'a Anchor,
    /// Nonce sealed into the commitment.
    pub revealed_nonce: &'a str,
    /// Reasoning trace nodes.
    pub trace_nodes: &'a [Value],
    /// Current environment digest.
    pub env_digest: &'a str,
    /// Policy digest stamped on the certificate.
    pub policy_digest: &'a str,
    /// Logical reveal time.
    pub reveal_timestamp: u64,
    /// Witness supplied by the proposer; generated by the kernel when absent.
    pub witness: Option<&'a CouplingWitness>,
}

/// Gate state carried from the checks into issuance.
struct Admission {
    certificate: ActuationCertificate,
    delegation_depth: usize,
}

fn violation(code: InvariantCode, tag: ViolationTag, detail: impl Into<String>) -> KernelError {
    KernelError::Invariant(InvariantViolation::tagged(code, tag, detail))
}

/// Length of the delegation chain, or why it is malformed.
///
/// Links must be objects; a link carrying `depth` must sit at that 1-based
/// position.
fn delegation_depth(proposal: &Value) -> Result<usize, String> {
    let links = match proposal.get("delegation_chain") {
        None | Some(Value::Null) => return Ok(0),
        Some(Value::Array(links)) => links,
        Some(_) => return Err("delegation_chain is not a list".to_owned()),
    };
    for (i, link) in links.iter().enumerate() {
        let Some(fields) = link.as_object() else {
            return Err(format!("delegation link {i} is not an object"));
        };
        if let Some(depth) = fields.get("depth") {
            let position = u64::try_from(i.saturating_add(1)).unwrap_or(u64::MAX);
            if depth.as_u64() != Some(position) {
                return Err(format!("delegation link {i} claims depth {depth}"));
            }
        }
    }
    Ok(links.len())
}

impl Kernel {
    /// Run the gate and issue a certificate for an admitted proposal.
    ///
    /// Order: K4, K5 (commitment, anchor provenance, anchor reuse),
    /// recomposition, trace budget, K6 (trace swap, environment, witness,
    /// delegation), certificate assembly and leak scan, anchor consumption. On the happy path the audit
    /// log gains `REVEAL`, `DECISION` and `ACTUATION`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Invariant`] for K4-K6 breaches,
    /// [`KernelError::Budget`] when the step abstains,
    /// [`KernelError::Recomposition`] when the proposal is refused before
    /// binding, and [`KernelError::Sovereignty`] if the certificate would leak
    /// the authority. The anchor stays unused in every error case.
    pub fn verify_and_issue_certificate(
        &mut self,
        req: RevealRequest<'_>,
    ) -> Result<ActuationCertificate, KernelError> {
        self.budget.reset();
        let commitment_hash = req.commitment.commitment_hash.as_str();
        self.audit
            .log_reveal(commitment_hash, req.anchor, req.trace_nodes.len(), req.reveal_timestamp)?;

        let admitted = match self.check(&req) {
            Ok(admitted) => admitted,
            Err(err) => {
                self.record_rejection(&req, &err);
                return Err(err);
            }
        };

        let Admission {
            certificate,
            delegation_depth,
        } = admitted;
        if !self.anchors.mark_used(&req.anchor.anchor_hash) {
            let err = violation(InvariantCode::K5, ViolationTag::AnchorReuse, "anchor consumed concurrently");
            self.record_rejection(&req, &err);
            return Err(err);
        }
        self.acv.resolve(commitment_hash, true);

        self.audit
            .log_decision(commitment_hash, req.anchor, true, "admitted", req.reveal_timestamp)?;
        let seq = self
            .audit
            .log_actuation(&certificate, delegation_depth, true)?
            .sequence_number;
        tracing::info!(
            certificate_id = %certificate.certificate_id(),
            action_type = %certificate.action().action_type,
            "actuation certificate issued"
        );
        self.external.emit(
            "actuation",
            &[
                ("decision", json!("admit")),
                ("sequence_number", json!(seq)),
                ("certificate_id", json!(certificate.certificate_id())),
                ("action_type", json!(certificate.action().action_type)),
                ("anchor_id", json!(req.anchor.anchor_id)),
            ],
        )?;
        Ok(certificate)
    }

    fn check(&mut self, req: &RevealRequest<'_>) -> Result<Admission, KernelError> {
        let commitment = req.commitment;
        let anchor = req.anchor;

        // K4
        if !temporal_order_holds(commitment.timestamp, anchor.timestamp, req.reveal_timestamp) {
            return Err(violation(
                InvariantCode::K4,
                ViolationTag::TemporalOrder,
                format!(
                    "commit {} < anchor {} < reveal {} does not hold",
                    commitment.timestamp, anchor.timestamp, req.reveal_timestamp
                ),
            ));
        }

        // K5
        let Some(registered) = self.commitments.get(&commitment.commitment_hash) else {
            return Err(violation(
                InvariantCode::K5,
                ViolationTag::UnknownCommitment,
                "commitment was never registered",
            ));
        };
        if registered.nonce_ref != nonce_ref(req.revealed_nonce) || registered.timestamp != commitment.timestamp {
            return Err(violation(
                InvariantCode::K5,
                ViolationTag::CommitmentMismatch,
                "revealed nonce or timestamp differs from the registered commitment",
            ));
        }
        let canonical = self.canon.canonicalize(req.proposal)?;
        let size = u64::try_from(canonical.bytes.len()).unwrap_or(u64::MAX);
        self.budget.charge_bytes(size)?;
        self.budget.charge_operation(OperationKind::Canonicalize, size)?;
        let recomputed = compute_commitment_hash(&canonical.bytes, req.revealed_nonce, self.authority.fingerprint());
        self.budget.charge_operation(OperationKind::Compare, 0)?;
        if recomputed != registered.commitment_hash {
            return Err(violation(
                InvariantCode::K5,
                ViolationTag::CommitmentMismatch,
                "revealed proposal does not match the commitment",
            ));
        }
        if !self.anchors.is_issued(anchor) || anchor.commitment_hash != commitment.commitment_hash {
            return Err(violation(
                InvariantCode::K5,
                ViolationTag::UnknownAnchor,
                "anchor was not issued by this kernel for this commitment",
            ));
        }
        if self.anchors.is_used(&anchor.anchor_hash) {
            return Err(violation(
                InvariantCode::K5,
                ViolationTag::AnchorReuse,
                "anchor already consumed",
            ));
        }
        self.acv.reveal(&commitment.commitment_hash)?;

        // Recomposition
        let recomposed = self.recomposer.recompose(
            req.proposal,
            RecomposeContext {
                canon: &self.canon,
                budget: &mut self.budget,
                signer: &mut self.authority,
                source_proposal_hash: &canonical.hash,
                timestamp: req.reveal_timestamp,
            },
        )?;

        // Trace
        let mut node_hashes = Vec::with_capacity(req.trace_nodes.len());
        for node in req.trace_nodes {
            self.budget.charge_node()?;
            let hashed = self.canon.canonicalize(node)?;
            let len = u64::try_from(hashed.bytes.len()).unwrap_or(u64::MAX);
            self.budget.charge_bytes(len)?;
            self.budget.charge_operation(OperationKind::Hash, len)?;
            node_hashes.push(hashed.hash);
        }

        // K6
        if let Some(embedded) = req.proposal.pointer("/trace/nodes") {
            if embedded.as_array().map(Vec::as_slice) != Some(req.trace_nodes) {
                return Err(violation(
                    InvariantCode::K6,
                    ViolationTag::TraceSwap,
                    "submitted trace differs from the trace in the revealed proposal",
                ));
            }
        }
        if self.anchors.env_digest_of(&anchor.anchor_hash) != Some(req.env_digest) {
            return Err(violation(
                InvariantCode::K6,
                ViolationTag::EnvMismatch,
                "environment digest differs from the anchored one",
            ));
        }
        let pattern = self.config.coupling.pattern;
        let openings = self.config.coupling.merkle_openings;
        let input = CouplingInput {
            node_hashes: &node_hashes,
            anchor_hash: &anchor.anchor_hash,
            env_digest: req.env_digest,
        };
        let witness = match req.witness {
            Some(w) => w.clone(),
            None => CouplingWitness::generate(pattern, input, openings).map_err(|e| {
                violation(InvariantCode::K6, ViolationTag::WitnessMismatch, e.to_string())
            })?,
        };
        self.budget.charge_work(witness.work_units())?;
        self.budget.charge_operation(OperationKind::Verify, witness.work_units())?;
        witness
            .verify(pattern, input, openings)
            .map_err(|e| violation(InvariantCode::K6, ViolationTag::WitnessMismatch, e.to_string()))?;

        let max_depth = self.config.delegation.max_depth;
        let depth = delegation_depth(req.proposal).map_err(|detail| {
            violation(InvariantCode::K6, ViolationTag::DelegationChainInconsistent, detail)
        })?;
        if depth > max_depth {
            return Err(KernelError::Invariant(
                InvariantViolation::tagged(
                    InvariantCode::K6,
                    ViolationTag::DelegationDepth,
                    format!("delegation depth {depth} exceeds {max_depth}"),
                )
                .with_delegation_depth(depth),
            ));
        }

        // Issuance
        let RecompositionResult { action, binding, .. } = recomposed;
        let certificate = ActuationCertificate::issue(CertificateParts {
            kernel_id: self.kernel_id,
            commitment: commitment.clone(),
            anchor: anchor.clone(),
            witness,
            binding,
            action,
            policy_digest: req.policy_digest.to_owned(),
            env_digest: req.env_digest.to_owned(),
            trace_digest: self.canon.hash_value(req.trace_nodes)?,
            request_digest: self
                .canon
                .hash_value(req.proposal.get("request").unwrap_or(&Value::Null))?,
            issued_at: req.reveal_timestamp,
        });
        self.authority.assert_no_leaks_in(&certificate)?;

        Ok(Admission {
            certificate,
            delegation_depth: depth,
        })
    }

    /// Write the failure entry and the reject decision. Logging errors are
    /// reported but never replace the gate error.
    fn record_rejection(&mut self, req: &RevealRequest<'_>, err: &KernelError) {
        let ts = req.reveal_timestamp;
        let logged = match err {
            KernelError::Invariant(v) => {
                tracing::warn!(invariant = %v.code, tag = ?v.tag, "invariant violation at gate");
                self.audit.log_invariant_violation(v, Some(req.anchor), ts).map(|_| ())
            }
            KernelError::Budget(e) => {
                tracing::info!(budget_kind = e.kind().as_str(), "step abstained");
                self.audit.log_abstention(e.kind().as_str(), &e.to_string(), ts).map(|_| ())
            }
            KernelError::Recomposition(e) => {
                let code = e.code().map_or("RECOMPOSITION", |c| c.as_str());
                let markers = match e {
                    RecompositionError::DelegationAuthority { markers } => markers.len(),
                    _ => 0,
                };
                tracing::warn!(code, "recomposition rejected");
                self.audit.log_recomposition_rejected(code, markers, ts).map(|_| ())
            }
            KernelError::Sovereignty(leak) => {
                tracing::error!(path = %leak.path, "sovereignty violation at gate");
                self.audit.log_sovereignty_violation(leak, ts).map(|_| ())
            }
            _ => Ok(()),
        };
        let reason = err.reason_code();
        let decided = logged.and_then(|()| {
            self.audit
                .log_decision(&req.commitment.commitment_hash, req.anchor, false, &reason, ts)
                .map(|_| ())
        });
        if let Err(e) = decided {
            tracing::error!(error = %e, "failed to record gate rejection");
        }
        self.acv.resolve(&req.commitment.commitment_hash, false);

        let mut fields = vec![
            ("decision", json!("reject")),
            ("error_code", json!(reason)),
            ("anchor_id", json!(req.anchor.anchor_id)),
        ];
        if let Some(code) = err.invariant_code() {
            fields.push(("invariant", json!(code)));
        }
        if let KernelError::Budget(e) = err {
            fields.push(("budget_kind", json!(e.kind().as_str())));
        }
        if let Err(e) = self.external.emit("decision", &fields) {
            tracing::error!(error = %e, "external decision event blocked");
        }
    }
}
