//! Mutex-wrapped kernel for deployments that share one instance.
//!
//! The mutex is the only lock in the substrate. Holding it for a whole call
//! keeps audit sequence numbers and anchor consumption strictly ordered.

use std::sync::{Arc, Mutex};

use super::{Kernel, KernelError, RevealRequest};
use crate::acv::{Anchor, RegisteredCommitment};
use crate::audit::AuditEntry;
use crate::probe::ProbeReport;
use crate::types::ActuationCertificate;

/// Cloneable handle to one kernel instance.
#[derive(Clone)]
pub struct SharedKernel {
    inner: Arc<Mutex<Kernel>>,
}

impl SharedKernel {
    /// Share `kernel`.
    #[must_use]
    pub fn new(kernel: Kernel) -> Self {
        Self {
            inner: Arc::new(Mutex::new(kernel)),
        }
    }

    /// Run `f` with exclusive access to the kernel.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::LockPoisoned`] if a previous holder panicked.
    pub fn with<R>(&self, f: impl FnOnce(&mut Kernel) -> R) -> Result<R, KernelError> {
        let mut guard = self.inner.lock().map_err(|_| KernelError::LockPoisoned)?;
        Ok(f(&mut guard))
    }

    /// See [`Kernel::register_commitment`].
    ///
    /// # Errors
    ///
    /// As for the owned kernel, plus [`KernelError::LockPoisoned`].
    pub fn register_commitment(&self, commitment: &RegisteredCommitment) -> Result<(), KernelError> {
        self.with(|k| k.register_commitment(commitment))?
    }

    /// See [`Kernel::issue_anchor`].
    ///
    /// # Errors
    ///
    /// As for the owned kernel, plus [`KernelError::LockPoisoned`].
    pub fn issue_anchor(
        &self,
        commitment_hash: &str,
        env_digest: &str,
        timestamp: u64,
    ) -> Result<Anchor, KernelError> {
        self.with(|k| k.issue_anchor(commitment_hash, env_digest, timestamp))?
    }

    /// See [`Kernel::verify_and_issue_certificate`].
    ///
    /// # Errors
    ///
    /// As for the owned kernel, plus [`KernelError::LockPoisoned`].
    pub fn verify_and_issue_certificate(
        &self,
        req: RevealRequest<'_>,
    ) -> Result<ActuationCertificate, KernelError> {
        self.with(|k| k.verify_and_issue_certificate(req))?
    }

    /// Public key proposers commit against.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::LockPoisoned`].
    pub fn public_key(&self) -> Result<String, KernelError> {
        self.with(|k| k.public_key().to_owned())
    }

    /// Copy of the audit chain.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::LockPoisoned`].
    pub fn export_audit(&self) -> Result<Vec<AuditEntry>, KernelError> {
        self.with(|k| k.export_audit())
    }

    /// Probe report over the current state.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::LockPoisoned`].
    pub fn probe_report(&self) -> Result<ProbeReport, KernelError> {
        self.with(|k| k.probe_report())
    }
}

impl std::fmt::Debug for SharedKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKernel").finish_non_exhaustive()
    }
}
