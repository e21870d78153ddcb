//! Append-only, hash-chained audit log.
//!
//! Every protocol decision point becomes an [`AuditEntry`] whose hash covers
//! its content and its predecessor's hash. Entries are never mutated or
//! removed. The exported sequence (or its JSON Lines rendering) is the only
//! externally persisted state, and consumers re-verify it with
//! [`verify_entries`] before trusting it.

pub mod external;

use std::io::{BufRead, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::acv::{Anchor, RegisteredCommitment};
use crate::authority::{assert_no_leaks_in, ActuationAuthorityLeakError};
use crate::canonical::{domain_hash, CanonicalizationError, Canonicalizer, HashDomain, ZERO_HASH};
use crate::kernel::error::{InvariantCode, InvariantViolation, KernelError};

/// Audit event discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    /// Commitment registered.
    Commit,
    /// Anchor issued.
    Anchor,
    /// Proposal revealed.
    Reveal,
    /// Admit or reject verdict.
    Decision,
    /// Certificate issued.
    Actuation,
    /// K4-K7 breach.
    InvariantViolation,
    /// Budget exhaustion.
    Abstention,
    /// Recomposer refused the proposal.
    RecompositionRejected,
    /// Call to a bypass operation.
    Temptation,
    /// Attempted export of the actuation authority.
    SovereigntyViolation,
}

impl EntryType {
    /// Stable upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "COMMIT",
            Self::Anchor => "ANCHOR",
            Self::Reveal => "REVEAL",
            Self::Decision => "DECISION",
            Self::Actuation => "ACTUATION",
            Self::InvariantViolation => "INVARIANT_VIOLATION",
            Self::Abstention => "ABSTENTION",
            Self::RecompositionRejected => "RECOMPOSITION_REJECTED",
            Self::Temptation => "TEMPTATION",
            Self::SovereigntyViolation => "SOVEREIGNTY_VIOLATION",
        }
    }
}

/// One link in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// UUIDv5 of the sequence number under the kernel namespace.
    pub entry_id: Uuid,
    /// Event kind.
    pub entry_type: EntryType,
    /// Predecessor's `entry_hash`, or 64 zeros for the first entry.
    pub prev_hash: String,
    /// Position in the chain, from zero.
    pub sequence_number: u64,
    /// Logical time of the event.
    pub timestamp: u64,
    /// Event detail.
    pub payload: Value,
    /// Hash over every field above.
    pub entry_hash: String,
}

impl AuditEntry {
    /// Recompute `entry_hash` from the entry's content.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalizationError`] if the payload cannot be canonicalized.
    pub fn compute_hash(&self, canon: &Canonicalizer) -> Result<String, CanonicalizationError> {
        let payload = canon.canonicalize(&self.payload)?;
        Ok(domain_hash(
            HashDomain::AuditEntry,
            &[
                self.entry_id.as_bytes(),
                self.entry_type.as_str().as_bytes(),
                self.prev_hash.as_bytes(),
                &self.sequence_number.to_be_bytes(),
                &self.timestamp.to_be_bytes(),
                &payload.bytes,
            ],
        ))
    }
}

// ── Errors ──────────────────────────────────────────────────────────

/// What is wrong with a chain link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainFault {
    /// Sequence number is not the entry's position.
    #[error("sequence number {found}, expected {expected}")]
    SequenceGap {
        /// Position in the list.
        expected: u64,
        /// Stored sequence number.
        found: u64,
    },

    /// `prev_hash` does not match the predecessor.
    #[error("prev_hash {found} does not link to {expected}")]
    PrevHashMismatch {
        /// Predecessor's hash (or genesis).
        expected: String,
        /// Stored `prev_hash`.
        found: String,
    },

    /// Stored hash differs from the recomputed one.
    #[error("entry_hash {stored} does not match recomputed {computed}")]
    HashMismatch {
        /// Stored hash.
        stored: String,
        /// Recomputed hash.
        computed: String,
    },

    /// The payload could not be canonicalized.
    #[error("payload cannot be hashed: {0}")]
    Unhashable(String),
}

/// First broken link found by [`verify_entries`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("audit chain broken at entry {index}: {fault}")]
pub struct ChainError {
    /// Index of the first bad entry.
    pub index: u64,
    /// What is wrong with it.
    pub fault: ChainFault,
}

/// Audit log write and import failures.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Payload embeds the actuation authority.
    #[error(transparent)]
    Leak(#[from] ActuationAuthorityLeakError),

    /// Payload cannot be canonicalized.
    #[error("audit payload rejected: {0}")]
    Canonical(#[from] CanonicalizationError),

    /// Mirror or export I/O failed.
    #[error("audit I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON Lines import.
    #[error("audit import failed at line {line}: {source}")]
    Import {
        /// One-based line number.
        line: usize,
        /// Parse error.
        source: serde_json::Error,
    },
}

// ── Verification ────────────────────────────────────────────────────

/// Re-walk `entries`: sequence, then linkage, then hash, per entry.
///
/// # Errors
///
/// Returns the first [`ChainError`] found.
pub fn verify_entries(entries: &[AuditEntry], canon: &Canonicalizer) -> Result<(), ChainError> {
    let mut expected_prev = ZERO_HASH.to_owned();
    for (i, entry) in entries.iter().enumerate() {
        let index = u64::try_from(i).unwrap_or(u64::MAX);
        let fail = |fault| ChainError { index, fault };
        if entry.sequence_number != index {
            return Err(fail(ChainFault::SequenceGap {
                expected: index,
                found: entry.sequence_number,
            }));
        }
        if entry.prev_hash != expected_prev {
            return Err(fail(ChainFault::PrevHashMismatch {
                expected: expected_prev,
                found: entry.prev_hash.clone(),
            }));
        }
        let computed = entry
            .compute_hash(canon)
            .map_err(|e| fail(ChainFault::Unhashable(e.to_string())))?;
        if computed != entry.entry_hash {
            return Err(fail(ChainFault::HashMismatch {
                stored: entry.entry_hash.clone(),
                computed,
            }));
        }
        expected_prev.clone_from(&entry.entry_hash);
    }
    Ok(())
}

/// Raise K7 when the chain does not verify.
///
/// # Errors
///
/// Returns [`KernelError::Invariant`] with code K7 on the first broken link.
pub fn enforce_k7_on(entries: &[AuditEntry], canon: &Canonicalizer) -> Result<(), KernelError> {
    verify_entries(entries, canon).map_err(|e| {
        tracing::warn!(index = e.index, fault = %e.fault, "audit chain verification failed");
        KernelError::Invariant(InvariantViolation::new(InvariantCode::K7, e.to_string()))
    })
}

/// Write entries as JSON Lines.
///
/// # Errors
///
/// Returns [`AuditError::Io`] on write failure.
pub fn write_jsonl(entries: &[AuditEntry], mut writer: impl Write) -> Result<(), AuditError> {
    for entry in entries {
        let line = serde_json::to_string(entry).map_err(std::io::Error::from)?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read JSON Lines written by [`write_jsonl`]. Blank lines are skipped.
///
/// # Errors
///
/// Returns [`AuditError::Import`] naming the first malformed line.
pub fn read_jsonl(reader: impl BufRead) -> Result<Vec<AuditEntry>, AuditError> {
    let mut entries = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|source| AuditError::Import {
            line: i.saturating_add(1),
            source,
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

// ── Log ─────────────────────────────────────────────────────────────

/// Hash-chained audit log owned by one kernel instance.
pub struct AuditLog {
    kernel_id: Uuid,
    canon: Canonicalizer,
    entries: Vec<AuditEntry>,
    mirror: Option<Box<dyn Write + Send>>,
}

impl AuditLog {
    /// Create an empty log.
    #[must_use]
    pub fn new(kernel_id: Uuid, canon: Canonicalizer) -> Self {
        Self {
            kernel_id,
            canon,
            entries: Vec::new(),
            mirror: None,
        }
    }

    /// Mirror every appended entry as a JSON line to `writer`.
    #[must_use]
    pub fn with_mirror(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.mirror = Some(writer);
        self
    }

    /// Mirror to a file opened in append mode.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Io`] if the file cannot be opened.
    pub fn open_mirror(self, path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(self.with_mirror(Box::new(file)))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in order.
    #[must_use]
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Owned copy of the chain for export.
    #[must_use]
    pub fn export(&self) -> Vec<AuditEntry> {
        self.entries.clone()
    }

    /// Write the chain as JSON Lines.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Io`] on write failure.
    pub fn export_jsonl(&self, writer: impl Write) -> Result<(), AuditError> {
        write_jsonl(&self.entries, writer)
    }

    /// Hash of the newest entry, or genesis.
    #[must_use]
    pub fn head_hash(&self) -> &str {
        self.entries
            .last()
            .map_or(ZERO_HASH, |e| e.entry_hash.as_str())
    }

    /// Append an event.
    ///
    /// The payload is leak-scanned and canonicalized first; on any error
    /// nothing is appended. With a mirror attached the line is written before
    /// the entry joins the in-memory chain.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if the payload leaks the authority, cannot be
    /// canonicalized or the mirror write fails.
    pub fn append<T: Serialize + ?Sized>(
        &mut self,
        entry_type: EntryType,
        timestamp: u64,
        payload: &T,
    ) -> Result<&AuditEntry, AuditError> {
        assert_no_leaks_in(payload)?;
        let payload = serde_json::to_value(payload).map_err(|e| {
            AuditError::Canonical(CanonicalizationError::Custom(e.to_string()))
        })?;
        let sequence_number = u64::try_from(self.entries.len()).unwrap_or(u64::MAX);
        let mut entry = AuditEntry {
            entry_id: Uuid::new_v5(
                &self.kernel_id,
                format!("audit:{sequence_number}").as_bytes(),
            ),
            entry_type,
            prev_hash: self.head_hash().to_owned(),
            sequence_number,
            timestamp,
            payload,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash(&self.canon)?;

        if let Some(mirror) = self.mirror.as_mut() {
            let line = serde_json::to_string(&entry).map_err(std::io::Error::from)?;
            writeln!(mirror, "{line}")?;
            mirror.flush()?;
        }

        tracing::debug!(
            seq = sequence_number,
            entry_type = entry_type.as_str(),
            "audit entry appended"
        );
        self.entries.push(entry);
        let last = self.entries.len().saturating_sub(1);
        Ok(&self.entries[last])
    }

    /// Log a registered commitment.
    ///
    /// # Errors
    ///
    /// See [`AuditLog::append`].
    pub fn log_commit(&mut self, commitment: &RegisteredCommitment) -> Result<&AuditEntry, AuditError> {
        self.append(
            EntryType::Commit,
            commitment.timestamp,
            &json!({
                "commitment_hash": commitment.commitment_hash,
                "nonce_ref": commitment.nonce_ref,
            }),
        )
    }

    /// Log an issued anchor.
    ///
    /// # Errors
    ///
    /// See [`AuditLog::append`].
    pub fn log_anchor(&mut self, anchor: &Anchor, env_digest: &str) -> Result<&AuditEntry, AuditError> {
        self.append(
            EntryType::Anchor,
            anchor.timestamp,
            &json!({
                "anchor_id": anchor.anchor_id,
                "anchor_hash": anchor.anchor_hash,
                "commitment_hash": anchor.commitment_hash,
                "env_digest": env_digest,
            }),
        )
    }

    /// Log a reveal.
    ///
    /// # Errors
    ///
    /// See [`AuditLog::append`].
    pub fn log_reveal(
        &mut self,
        commitment_hash: &str,
        anchor: &Anchor,
        trace_nodes: usize,
        timestamp: u64,
    ) -> Result<&AuditEntry, AuditError> {
        self.append(
            EntryType::Reveal,
            timestamp,
            &json!({
                "commitment_hash": commitment_hash,
                "anchor_id": anchor.anchor_id,
                "trace_nodes": trace_nodes,
            }),
        )
    }

    /// Log an admit or reject verdict.
    ///
    /// # Errors
    ///
    /// See [`AuditLog::append`].
    pub fn log_decision(
        &mut self,
        commitment_hash: &str,
        anchor: &Anchor,
        admitted: bool,
        reason: &str,
        timestamp: u64,
    ) -> Result<&AuditEntry, AuditError> {
        self.append(
            EntryType::Decision,
            timestamp,
            &json!({
                "commitment_hash": commitment_hash,
                "anchor_id": anchor.anchor_id,
                "decision": if admitted { "admit" } else { "reject" },
                "reason": reason,
            }),
        )
    }

    /// Log an issued certificate.
    ///
    /// # Errors
    ///
    /// See [`AuditLog::append`].
    pub fn log_actuation(
        &mut self,
        certificate: &crate::types::ActuationCertificate,
        delegation_depth: usize,
        chain_consistent: bool,
    ) -> Result<&AuditEntry, AuditError> {
        self.append(
            EntryType::Actuation,
            certificate.issued_at(),
            &json!({
                "certificate_id": certificate.certificate_id(),
                "anchor_id": certificate.anchor().anchor_id,
                "action_type": certificate.action().action_type,
                "action_hash": certificate.action().action_hash,
                "binding_index": certificate.binding().binding_index,
                "delegation_depth": delegation_depth,
                "chain_consistent": chain_consistent,
            }),
        )
    }

    /// Log a K4-K7 breach.
    ///
    /// # Errors
    ///
    /// See [`AuditLog::append`].
    pub fn log_invariant_violation(
        &mut self,
        violation: &InvariantViolation,
        anchor: Option<&Anchor>,
        timestamp: u64,
    ) -> Result<&AuditEntry, AuditError> {
        self.append(
            EntryType::InvariantViolation,
            timestamp,
            &json!({
                "invariant": violation.code,
                "tag": violation.tag,
                "detail": violation.detail,
                "anchor_id": anchor.map(|a| a.anchor_id),
                "delegation_depth": violation.delegation_depth,
            }),
        )
    }

    /// Log a budget abstention.
    ///
    /// # Errors
    ///
    /// See [`AuditLog::append`].
    pub fn log_abstention(
        &mut self,
        budget_kind: &str,
        detail: &str,
        timestamp: u64,
    ) -> Result<&AuditEntry, AuditError> {
        self.append(
            EntryType::Abstention,
            timestamp,
            &json!({ "budget_kind": budget_kind, "detail": detail }),
        )
    }

    /// Log a recomposition refusal with its sanitized code.
    ///
    /// # Errors
    ///
    /// See [`AuditLog::append`].
    pub fn log_recomposition_rejected(
        &mut self,
        error_code: &str,
        marker_count: usize,
        timestamp: u64,
    ) -> Result<&AuditEntry, AuditError> {
        self.append(
            EntryType::RecompositionRejected,
            timestamp,
            &json!({ "error_code": error_code, "marker_count": marker_count }),
        )
    }

    /// Log a bypass attempt.
    ///
    /// # Errors
    ///
    /// See [`AuditLog::append`].
    pub fn log_temptation(&mut self, operation: &str, timestamp: u64) -> Result<&AuditEntry, AuditError> {
        self.append(
            EntryType::Temptation,
            timestamp,
            &json!({ "operation": operation, "outcome": "refused" }),
        )
    }

    /// Log a blocked export of the authority.
    ///
    /// # Errors
    ///
    /// See [`AuditLog::append`].
    pub fn log_sovereignty_violation(
        &mut self,
        leak: &ActuationAuthorityLeakError,
        timestamp: u64,
    ) -> Result<&AuditEntry, AuditError> {
        self.append(
            EntryType::SovereigntyViolation,
            timestamp,
            &json!({ "path": leak.path, "detail": leak.detail }),
        )
    }

    /// Verify this log's chain.
    ///
    /// # Errors
    ///
    /// Returns the first [`ChainError`].
    pub fn verify_chain(&self) -> Result<(), ChainError> {
        verify_entries(&self.entries, &self.canon)
    }

    /// Raise K7 on any chain mismatch.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Invariant`] with code K7.
    pub fn enforce_k7(&self) -> Result<(), KernelError> {
        enforce_k7_on(&self.entries, &self.canon)
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("kernel_id", &self.kernel_id)
            .field("entries", &self.entries.len())
            .field("mirrored", &self.mirror.is_some())
            .finish()
    }
}
