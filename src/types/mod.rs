// Protocol artifacts that cross the kernel boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::acv::{Anchor, Commitment, CouplingWitness};
use crate::canonical::{domain_hash, CanonicalizationError, Canonicalizer, HashDomain};

/// Action rebuilt inside the kernel from validated primitives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecomposedAction {
    /// Allow-listed action type.
    pub action_type: String,
    /// Fresh copy of the arguments.
    pub action_args: Value,
    /// `H(action_type, action_args)` over the reconstructed object.
    pub action_hash: String,
    /// Canonical hash of the external proposal it came from.
    pub source_proposal_hash: String,
    /// Logical time of recomposition.
    pub timestamp: u64,
}

impl RecomposedAction {
    /// Identity hash of an `(action_type, action_args)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalizationError`] if the arguments cannot be canonicalized.
    pub fn compute_hash(
        canon: &Canonicalizer,
        action_type: &str,
        action_args: &Value,
    ) -> Result<String, CanonicalizationError> {
        let body = serde_json::json!({
            "action_type": action_type,
            "action_args": action_args,
        });
        let canonical = canon.canonicalize(&body)?;
        Ok(domain_hash(HashDomain::ActionHash, &[&canonical.bytes]))
    }
}

/// Public proof that the kernel's authority bound an action hash.
///
/// Never contains the secret itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuationBinding {
    /// Bound action hash.
    pub action_hash: String,
    /// MAC over the binding fields.
    pub binding_signature: String,
    /// Per-binding nonce.
    pub binding_nonce: String,
    /// Public fingerprint of the authority.
    pub authority_fingerprint: String,
    /// Kernel that issued the binding.
    pub kernel_id: Uuid,
    /// Monotonic binding counter.
    pub binding_index: u64,
}

/// Wire and replay form of a certificate.
///
/// Anyone can build or deserialize one. It authorizes nothing until
/// [`Kernel::verify_record`](crate::kernel::Kernel::verify_record) or
/// [`Actuator::admit_record`](crate::actuator::Actuator::admit_record) accepts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateRecord {
    /// UUIDv5 of the binding signature.
    pub certificate_id: Uuid,
    /// Issuing kernel.
    pub kernel_id: Uuid,
    /// Commitment that was revealed.
    pub commitment: Commitment,
    /// Anchor consumed by the certificate.
    pub anchor: Anchor,
    /// Coupling witness over the trace.
    pub witness: CouplingWitness,
    /// Authority binding over the action hash.
    pub binding: ActuationBinding,
    /// Authorized action.
    pub action: RecomposedAction,
    /// Caller-supplied policy digest.
    pub policy_digest: String,
    /// Environment digest the anchor was issued against.
    pub env_digest: String,
    /// Digest over the ordered trace node hashes.
    pub trace_digest: String,
    /// Canonical hash of the proposal's `request` member.
    pub request_digest: String,
    /// Logical issuance time.
    pub issued_at: u64,
}

/// The sole token authorizing a side effect.
///
/// Only the gate builds one and it cannot be deserialized. Certificates
/// arriving from outside are handled as [`CertificateRecord`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ActuationCertificate {
    record: CertificateRecord,
}

/// Inputs assembled by the gate for a new certificate.
#[derive(Debug, Clone)]
pub(crate) struct CertificateParts {
    pub(crate) kernel_id: Uuid,
    pub(crate) commitment: Commitment,
    pub(crate) anchor: Anchor,
    pub(crate) witness: CouplingWitness,
    pub(crate) binding: ActuationBinding,
    pub(crate) action: RecomposedAction,
    pub(crate) policy_digest: String,
    pub(crate) env_digest: String,
    pub(crate) trace_digest: String,
    pub(crate) request_digest: String,
    pub(crate) issued_at: u64,
}

impl ActuationCertificate {
    pub(crate) fn issue(parts: CertificateParts) -> Self {
        Self {
            record: CertificateRecord {
                certificate_id: Uuid::new_v5(&parts.kernel_id, parts.binding.binding_signature.as_bytes()),
                kernel_id: parts.kernel_id,
                commitment: parts.commitment,
                anchor: parts.anchor,
                witness: parts.witness,
                binding: parts.binding,
                action: parts.action,
                policy_digest: parts.policy_digest,
                env_digest: parts.env_digest,
                trace_digest: parts.trace_digest,
                request_digest: parts.request_digest,
                issued_at: parts.issued_at,
            },
        }
    }

    /// Read-only view of every field.
    #[must_use]
    pub fn record(&self) -> &CertificateRecord {
        &self.record
    }

    /// UUIDv5 of the binding signature.
    #[must_use]
    pub fn certificate_id(&self) -> Uuid {
        self.record.certificate_id
    }

    /// Issuing kernel.
    #[must_use]
    pub fn kernel_id(&self) -> Uuid {
        self.record.kernel_id
    }

    /// Commitment that was revealed.
    #[must_use]
    pub fn commitment(&self) -> &Commitment {
        &self.record.commitment
    }

    /// Anchor consumed by this certificate.
    #[must_use]
    pub fn anchor(&self) -> &Anchor {
        &self.record.anchor
    }

    /// Coupling witness over the trace.
    #[must_use]
    pub fn witness(&self) -> &CouplingWitness {
        &self.record.witness
    }

    /// Authority binding over the action hash.
    #[must_use]
    pub fn binding(&self) -> &ActuationBinding {
        &self.record.binding
    }

    /// Action this certificate authorizes.
    #[must_use]
    pub fn action(&self) -> &RecomposedAction {
        &self.record.action
    }

    /// Caller-supplied policy digest.
    #[must_use]
    pub fn policy_digest(&self) -> &str {
        &self.record.policy_digest
    }

    /// Environment digest the anchor was issued against.
    #[must_use]
    pub fn env_digest(&self) -> &str {
        &self.record.env_digest
    }

    /// Digest over the ordered trace node hashes.
    #[must_use]
    pub fn trace_digest(&self) -> &str {
        &self.record.trace_digest
    }

    /// Canonical hash of the proposal's `request` member.
    #[must_use]
    pub fn request_digest(&self) -> &str {
        &self.record.request_digest
    }

    /// Logical issuance time.
    #[must_use]
    pub fn issued_at(&self) -> u64 {
        self.record.issued_at
    }
}
