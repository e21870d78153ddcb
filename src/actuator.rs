//! Actuator-side admission.
//!
//! The component that applies side effects does not trust the kernel's hash
//! of the action. It re-canonicalizes the action with its own canonicalizer
//! instance, checks the binding through a verification-only handle and
//! refuses to apply a certificate twice.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::authority::BindingVerifier;
use crate::canonical::{CanonicalizationError, Canonicalizer};
use crate::config::CanonicalConfig;
use crate::types::{ActuationCertificate, CertificateRecord, RecomposedAction};

/// Why the actuator refused a certificate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActuationRejected {
    /// The actuator's hash of the action differs from the certificate's.
    #[error("canonical disagreement: certificate says {claimed}, actuator computed {computed}")]
    CanonicalDisagreement {
        /// Hash carried by the certificate.
        claimed: String,
        /// Hash recomputed here.
        computed: String,
    },

    /// The binding covers a different action.
    #[error("binding covers {bound}, not {action}")]
    BindingMismatch {
        /// Hash in the binding.
        bound: String,
        /// Hash of the action.
        action: String,
    },

    /// The binding was not produced by the kernel's authority.
    #[error("binding signature does not verify")]
    InvalidBinding,

    /// The certificate was already applied.
    #[error("certificate {certificate_id} already applied")]
    Replay {
        /// Certificate id.
        certificate_id: Uuid,
    },

    /// The action could not be canonicalized.
    #[error(transparent)]
    Canonical(#[from] CanonicalizationError),
}

/// Gatekeeper in front of the side-effecting component.
#[derive(Debug, Default)]
pub struct Actuator {
    canon: Canonicalizer,
    applied: BTreeSet<Uuid>,
}

impl Actuator {
    /// Actuator with its own canonicalizer.
    #[must_use]
    pub fn new(config: CanonicalConfig) -> Self {
        Self {
            canon: Canonicalizer::new(config),
            applied: BTreeSet::new(),
        }
    }

    /// Number of certificates admitted.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// Admit `certificate` and hand back the action to apply.
    ///
    /// # Errors
    ///
    /// Returns [`ActuationRejected`] on canonical disagreement, an invalid or
    /// mismatched binding, or a replayed certificate.
    pub fn admit(
        &mut self,
        certificate: &ActuationCertificate,
        verifier: &dyn BindingVerifier,
    ) -> Result<RecomposedAction, ActuationRejected> {
        self.admit_record(certificate.record(), verifier)
    }

    /// Admit a certificate received in its wire form.
    ///
    /// # Errors
    ///
    /// Same as [`Actuator::admit`].
    pub fn admit_record(
        &mut self,
        record: &CertificateRecord,
        verifier: &dyn BindingVerifier,
    ) -> Result<RecomposedAction, ActuationRejected> {
        let action = &record.action;
        let computed = RecomposedAction::compute_hash(&self.canon, &action.action_type, &action.action_args)?;
        if computed != action.action_hash {
            tracing::warn!(certificate_id = %record.certificate_id, "actuator hash disagreement");
            return Err(ActuationRejected::CanonicalDisagreement {
                claimed: action.action_hash.clone(),
                computed,
            });
        }
        let binding = &record.binding;
        if binding.action_hash != computed {
            return Err(ActuationRejected::BindingMismatch {
                bound: binding.action_hash.clone(),
                action: computed,
            });
        }
        if !verifier.verify_binding(binding) {
            tracing::warn!(certificate_id = %record.certificate_id, "actuator binding rejected");
            return Err(ActuationRejected::InvalidBinding);
        }
        if !self.applied.insert(record.certificate_id) {
            return Err(ActuationRejected::Replay {
                certificate_id: record.certificate_id,
            });
        }
        tracing::info!(
            certificate_id = %record.certificate_id,
            action_type = %action.action_type,
            "actuation admitted"
        );
        Ok(action.clone())
    }
}
