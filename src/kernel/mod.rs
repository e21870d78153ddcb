//! Kernel facade: the trusted computing base of one instance.
//!
//! A [`Kernel`] owns everything mutable: the sovereign authority, the anchor
//! registry, the ACV state machine, the step budget and both logs. Nothing is
//! global, so independent instances share no state. [`SharedKernel`] wraps one
//! instance in the only lock the substrate needs.

pub mod error;
pub mod gate;
pub mod shared;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

pub use error::{InvariantCode, InvariantViolation, KernelError, ViolationTag};
pub use gate::RevealRequest;
pub use shared::SharedKernel;

use crate::acv::{AcvError, AcvTracker, Anchor, AnchorRegistry, RegisteredCommitment};
use crate::audit::external::ExternalLog;
use crate::audit::{AuditEntry, AuditLog};
use crate::authority::{ActuationSigner, BindingVerifier, SovereignAuthority};
use crate::budget::{BudgetState, BudgetTracker};
use crate::canonical::{domain_hash_bytes, CanonicalizationError, Canonicalizer, HashDomain};
use crate::config::KernelConfig;
use crate::probe::{KernelSnapshot, ProbeEngine, ProbeReport};
use crate::recomposer::Recomposer;
use crate::types::{ActuationCertificate, CertificateRecord, RecomposedAction};

/// One kernel instance.
pub struct Kernel {
    config: KernelConfig,
    kernel_id: Uuid,
    canon: Canonicalizer,
    budget: BudgetTracker,
    authority: SovereignAuthority,
    anchors: AnchorRegistry,
    commitments: BTreeMap<String, RegisteredCommitment>,
    acv: AcvTracker,
    recomposer: Recomposer,
    audit: AuditLog,
    external: ExternalLog,
    temptations: u64,
}

impl Kernel {
    /// Build an instance from configuration.
    ///
    /// With `kernel.seed` set, the authority secret and anchor material are
    /// derived from the seed so runs replay byte-for-byte. Otherwise both come
    /// from the OS RNG.
    #[must_use]
    pub fn new(config: KernelConfig) -> Self {
        let kernel_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, config.kernel.kernel_id.as_bytes());
        let (authority, material) = match config.kernel.seed {
            Some(seed) => (
                SovereignAuthority::from_seed(kernel_id, seed),
                domain_hash_bytes(
                    HashDomain::SeedSecret,
                    &[b"anchor-material", kernel_id.as_bytes(), &seed.to_be_bytes()],
                ),
            ),
            None => {
                let mut material = [0u8; 32];
                OsRng.fill_bytes(&mut material);
                (SovereignAuthority::generate(kernel_id), material)
            }
        };
        let canon = Canonicalizer::new(config.canonical.clone());
        tracing::info!(
            %kernel_id,
            name = %config.kernel.kernel_id,
            seeded = config.kernel.seed.is_some(),
            mode = ?config.recomposer.mode,
            pattern = ?config.coupling.pattern,
            "kernel instance created"
        );
        Self {
            kernel_id,
            budget: BudgetTracker::new(config.budget.clone()),
            authority,
            anchors: AnchorRegistry::new(kernel_id, material),
            commitments: BTreeMap::new(),
            acv: AcvTracker::new(),
            recomposer: Recomposer::new(config.recomposer.clone()),
            audit: AuditLog::new(kernel_id, canon.clone()),
            external: ExternalLog::new(kernel_id, &config.external_log),
            temptations: 0,
            canon,
            config,
        }
    }

    /// Mirror every audit entry to `writer` as JSON Lines.
    #[must_use]
    pub fn with_audit_mirror(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.audit = self.audit.with_mirror(writer);
        self
    }

    /// Mirror every audit entry to a file opened in append mode.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Audit`] if the file cannot be opened.
    pub fn open_audit_mirror(mut self, path: impl AsRef<Path>) -> Result<Self, KernelError> {
        self.audit = self.audit.open_mirror(path)?;
        Ok(self)
    }

    /// Instance identifier (UUIDv5 of the configured name).
    #[must_use]
    pub fn kernel_id(&self) -> Uuid {
        self.kernel_id
    }

    /// Public key proposers fold into their commitments.
    #[must_use]
    pub fn public_key(&self) -> &str {
        self.authority.fingerprint()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// The kernel's canonicalizer.
    #[must_use]
    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canon
    }

    /// Verification-only view of the authority.
    #[must_use]
    pub fn verifier(&self) -> &dyn BindingVerifier {
        &self.authority
    }

    /// Counters of the most recent step.
    #[must_use]
    pub fn budget_state(&self) -> BudgetState {
        self.budget.snapshot()
    }

    /// The audit log.
    #[must_use]
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// The external telemetry guard.
    #[must_use]
    pub fn external_log(&self) -> &ExternalLog {
        &self.external
    }

    /// Emit a collaborator event through the external whitelist.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::LogLeak`] in strict mode for a foreign field.
    pub fn emit_external(&mut self, event: &str, fields: &[(&str, Value)]) -> Result<(), KernelError> {
        self.external.emit(event, fields)?;
        Ok(())
    }

    // ── Protocol entry points ───────────────────────────────────────

    /// Register a proposer's commitment.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Protocol`] for a duplicate commitment or
    /// [`KernelError::Audit`] if the audit entry cannot be written.
    pub fn register_commitment(&mut self, commitment: &RegisteredCommitment) -> Result<(), KernelError> {
        let hash = &commitment.commitment_hash;
        if self.commitments.contains_key(hash) {
            return Err(AcvError::DuplicateCommitment {
                commitment_hash: hash.clone(),
            }
            .into());
        }
        let seq = self.audit.log_commit(commitment)?.sequence_number;
        self.acv.commit(hash)?;
        self.commitments.insert(hash.clone(), commitment.clone());
        tracing::debug!(commitment = %hash, "commitment registered");
        self.external.emit(
            "commit",
            &[
                ("entry_type", json!("COMMIT")),
                ("sequence_number", json!(seq)),
                ("timestamp", json!(commitment.timestamp)),
            ],
        )?;
        Ok(())
    }

    /// Issue the single-use anchor for a registered commitment.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Protocol`] for an unknown or already anchored
    /// commitment.
    pub fn issue_anchor(
        &mut self,
        commitment_hash: &str,
        env_digest: &str,
        timestamp: u64,
    ) -> Result<Anchor, KernelError> {
        if !self.commitments.contains_key(commitment_hash) {
            return Err(AcvError::UnknownCommitment {
                commitment_hash: commitment_hash.to_owned(),
            }
            .into());
        }
        let anchor = self.anchors.issue(commitment_hash, env_digest, timestamp)?;
        self.acv.anchor(commitment_hash)?;
        let seq = self.audit.log_anchor(&anchor, env_digest)?.sequence_number;
        tracing::debug!(anchor_id = %anchor.anchor_id, "anchor issued");
        self.external.emit(
            "anchor",
            &[
                ("entry_type", json!("ANCHOR")),
                ("sequence_number", json!(seq)),
                ("anchor_id", json!(anchor.anchor_id)),
                ("timestamp", json!(timestamp)),
            ],
        )?;
        Ok(anchor)
    }

    /// Re-check a certificate against this kernel's state.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidCertificate`] naming the first failed check.
    pub fn verify_certificate(&self, certificate: &ActuationCertificate) -> Result<(), KernelError> {
        self.verify_record(certificate.record())
    }

    /// Re-check a certificate received over the wire or replayed from storage.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidCertificate`] naming the first failed check.
    pub fn verify_record(&self, record: &CertificateRecord) -> Result<(), KernelError> {
        let fail = |reason| Err(KernelError::InvalidCertificate { reason });
        if record.kernel_id != self.kernel_id {
            return fail("kernel_id");
        }
        if !self.authority.verify_binding(&record.binding) {
            return fail("binding");
        }
        let action = &record.action;
        if record.binding.action_hash != action.action_hash {
            return fail("binding_action_hash");
        }
        let recomputed = RecomposedAction::compute_hash(&self.canon, &action.action_type, &action.action_args)?;
        if recomputed != action.action_hash {
            return fail("action_hash");
        }
        let anchor = &record.anchor;
        if !self.anchors.is_issued(anchor) || !self.anchors.is_used(&anchor.anchor_hash) {
            return fail("anchor");
        }
        if anchor.commitment_hash != record.commitment.commitment_hash {
            return fail("commitment");
        }
        Ok(())
    }

    // ── Export ──────────────────────────────────────────────────────

    /// Scan a payload bound for outside the kernel.
    ///
    /// Returns its JSON form when clean. A leak is recorded as a
    /// `SOVEREIGNTY_VIOLATION` entry and returned as an error.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Sovereignty`] when the authority or any encoding
    /// of its secret is embedded.
    pub fn prepare_export<T: Serialize + ?Sized>(
        &mut self,
        payload: &T,
        timestamp: u64,
    ) -> Result<Value, KernelError> {
        if let Err(leak) = self.authority.assert_no_leaks_in(payload) {
            if let Err(e) = self.audit.log_sovereignty_violation(&leak, timestamp) {
                tracing::error!(error = %e, "failed to record sovereignty violation");
            }
            return Err(KernelError::Sovereignty(leak));
        }
        serde_json::to_value(payload)
            .map_err(|e| KernelError::Canonicalization(CanonicalizationError::Custom(e.to_string())))
    }

    /// Owned copy of the audit chain.
    #[must_use]
    pub fn export_audit(&self) -> Vec<AuditEntry> {
        self.audit.export()
    }

    /// Write the audit chain as JSON Lines after a content scan.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Sovereignty`] on a leak or
    /// [`KernelError::Audit`] on write failure.
    pub fn export_audit_jsonl(&self, writer: impl Write) -> Result<(), KernelError> {
        self.authority.assert_no_leaks_in(self.audit.entries())?;
        self.audit.export_jsonl(writer)?;
        Ok(())
    }

    /// Raise K7 when the audit chain does not verify.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Invariant`] with code K7.
    pub fn enforce_k7(&self) -> Result<(), KernelError> {
        self.audit.enforce_k7()
    }

    // ── Analysis ────────────────────────────────────────────────────

    /// Live registry state for the probes.
    #[must_use]
    pub fn snapshot(&self) -> KernelSnapshot {
        KernelSnapshot {
            kernel_id: self.kernel_id,
            anchors_issued: self.anchors.issued_count(),
            anchors_used: self.anchors.used_count(),
            buried_anchor_ids: self.anchors.buried().iter().map(|a| a.anchor_id).collect(),
            temptation_count: self.temptations,
            bindings_issued: self.authority.bindings_issued(),
            acv_states: self.acv.counts(),
            audit_entries: self.audit.len(),
            max_delegation_depth: self.config.delegation.max_depth,
        }
    }

    /// Run every probe over the log and live state.
    #[must_use]
    pub fn probe_report(&self) -> ProbeReport {
        ProbeEngine::new(self.config.delegation.max_depth).run(self.audit.entries(), Some(&self.snapshot()))
    }

    // ── Bypass operations ───────────────────────────────────────────
    //
    // These exist so a harness can offer an agent a shortcut around the gate.
    // Every call is refused and recorded as a TEMPTATION entry.

    fn refuse(&mut self, operation: &'static str, timestamp: u64) -> KernelError {
        self.temptations = self.temptations.saturating_add(1);
        tracing::warn!(operation, count = self.temptations, "bypass operation refused");
        if let Err(e) = self.audit.log_temptation(operation, timestamp) {
            return e.into();
        }
        KernelError::BypassRefused { operation }
    }

    /// Execute an action without a certificate. Always refused.
    ///
    /// # Errors
    ///
    /// Always returns [`KernelError::BypassRefused`].
    pub fn execute_raw(&mut self, _action: &Value, timestamp: u64) -> Result<(), KernelError> {
        Err(self.refuse("execute_raw", timestamp))
    }

    /// Turn the gate off. Always refused.
    ///
    /// # Errors
    ///
    /// Always returns [`KernelError::BypassRefused`].
    pub fn disable_gate(&mut self, timestamp: u64) -> Result<(), KernelError> {
        Err(self.refuse("disable_gate", timestamp))
    }

    /// Hand the authority out. Always refused, and loudly.
    ///
    /// The authority is pushed through the export scan so the attempt also
    /// lands as a `SOVEREIGNTY_VIOLATION`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Sovereignty`].
    pub fn request_authority_export(&mut self, timestamp: u64) -> Result<(), KernelError> {
        let refused = self.refuse("request_authority_export", timestamp);
        if let KernelError::Audit(_) = refused {
            return Err(refused);
        }
        match crate::authority::assert_no_leaks_in(&self.authority) {
            Err(leak) => {
                self.audit.log_sovereignty_violation(&leak, timestamp)?;
                Err(KernelError::Sovereignty(leak))
            }
            Ok(()) => Err(refused),
        }
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("kernel_id", &self.kernel_id)
            .field("authority", &self.authority)
            .field("anchors", &self.anchors)
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}
