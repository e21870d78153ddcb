//! The closed kernel error type.
//!
//! Every fallible kernel operation returns `Result<T, KernelError>`. Protocol
//! invariants carry their gate code (K4-K7) and a structured detail instead
//! of a type per invariant.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::acv::AcvError;
use crate::audit::external::LogLeakError;
use crate::audit::AuditError;
use crate::authority::ActuationAuthorityLeakError;
use crate::budget::BudgetError;
use crate::canonical::CanonicalizationError;
use crate::recomposer::RecompositionError;

/// Protocol gate identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InvariantCode {
    /// `commit < anchor < reveal`.
    K4,
    /// Revealed proposal matches the registered commitment.
    K5,
    /// Trace is coupled to the anchor; delegation is bounded.
    K6,
    /// Audit chain integrity.
    K7,
}

impl fmt::Display for InvariantCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::K4 => "K4",
            Self::K5 => "K5",
            Self::K6 => "K6",
            Self::K7 => "K7",
        };
        f.write_str(s)
    }
}

/// Finer classification of a violation, used by the probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationTag {
    /// Timestamps out of order.
    TemporalOrder,
    /// Commitment was never registered.
    UnknownCommitment,
    /// Recomputed commitment or nonce reference differs.
    CommitmentMismatch,
    /// Anchor was not issued by this kernel for this commitment.
    UnknownAnchor,
    /// Anchor already consumed.
    AnchorReuse,
    /// Embedded trace differs from the submitted trace.
    TraceSwap,
    /// Environment digest differs from the one anchored.
    EnvMismatch,
    /// Coupling witness failed to verify.
    WitnessMismatch,
    /// Delegation chain longer than allowed.
    DelegationDepth,
    /// Delegation chain metadata is malformed.
    DelegationChainInconsistent,
    /// Audit chain broken.
    ChainBroken,
}

/// A protocol invariant breach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which gate failed.
    pub code: InvariantCode,
    /// Finer classification, when there is one.
    pub tag: Option<ViolationTag>,
    /// Human-readable detail. Kept out of external logs.
    pub detail: String,
    /// Observed delegation depth for K6 delegation failures.
    pub delegation_depth: Option<usize>,
}

impl InvariantViolation {
    /// Untagged violation.
    pub fn new(code: InvariantCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            tag: None,
            detail: detail.into(),
            delegation_depth: None,
        }
    }

    /// Violation with a classification tag.
    pub fn tagged(code: InvariantCode, tag: ViolationTag, detail: impl Into<String>) -> Self {
        Self {
            tag: Some(tag),
            ..Self::new(code, detail)
        }
    }

    /// Attach the delegation depth that triggered the violation.
    #[must_use]
    pub fn with_delegation_depth(mut self, depth: usize) -> Self {
        self.delegation_depth = Some(depth);
        self
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invariant {} violated: {}", self.code, self.detail)
    }
}

/// Everything the kernel can fail with.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// K4-K7 breach. Fatal to the proposal.
    #[error("{0}")]
    Invariant(InvariantViolation),

    /// Step budget exhausted. The step abstains.
    #[error("abstention: {0}")]
    Budget(#[from] BudgetError),

    /// Recomposer refused the proposal before binding.
    #[error("recomposition rejected: {0}")]
    Recomposition(RecompositionError),

    /// The actuation authority was about to leave the kernel.
    #[error("sovereignty violation: {0}")]
    Sovereignty(#[from] ActuationAuthorityLeakError),

    /// A value could not be canonicalized.
    #[error(transparent)]
    Canonicalization(#[from] CanonicalizationError),

    /// Non-whitelisted external log field in strict mode.
    #[error(transparent)]
    LogLeak(#[from] LogLeakError),

    /// Out-of-order protocol call.
    #[error("protocol error: {0}")]
    Protocol(#[from] AcvError),

    /// Audit log write or import failed.
    #[error("audit error: {0}")]
    Audit(AuditError),

    /// A certificate failed re-verification.
    #[error("invalid certificate: {reason}")]
    InvalidCertificate {
        /// First failed check.
        reason: &'static str,
    },

    /// A bypass operation was called. Always refused.
    #[error("bypass refused: {operation}")]
    BypassRefused {
        /// Operation name.
        operation: &'static str,
    },

    /// The shared kernel mutex was poisoned by a panicking holder.
    #[error("kernel lock poisoned")]
    LockPoisoned,
}

impl From<RecompositionError> for KernelError {
    fn from(err: RecompositionError) -> Self {
        match err {
            RecompositionError::Budget(e) => Self::Budget(e),
            other => Self::Recomposition(other),
        }
    }
}

impl From<AuditError> for KernelError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::Leak(e) => Self::Sovereignty(e),
            other => Self::Audit(other),
        }
    }
}

impl From<InvariantViolation> for KernelError {
    fn from(v: InvariantViolation) -> Self {
        Self::Invariant(v)
    }
}

impl KernelError {
    /// True for budget exhaustion, which abstains rather than rejects.
    #[must_use]
    pub fn is_abstention(&self) -> bool {
        matches!(self, Self::Budget(_))
    }

    /// Gate code for invariant violations.
    #[must_use]
    pub fn invariant_code(&self) -> Option<InvariantCode> {
        match self {
            Self::Invariant(v) => Some(v.code),
            _ => None,
        }
    }

    /// Violation tag for invariant violations.
    #[must_use]
    pub fn violation_tag(&self) -> Option<ViolationTag> {
        match self {
            Self::Invariant(v) => v.tag,
            _ => None,
        }
    }

    /// Sanitized reason code, safe for external logs.
    #[must_use]
    pub fn reason_code(&self) -> String {
        match self {
            Self::Invariant(v) => v.code.to_string(),
            Self::Budget(e) => format!("BUDGET_{}", e.kind().as_str().to_ascii_uppercase()),
            Self::Recomposition(e) => e
                .code()
                .map_or("RECOMPOSITION", |c| c.as_str())
                .to_owned(),
            Self::Sovereignty(_) => "SOVEREIGNTY".to_owned(),
            Self::Canonicalization(_) => "CANONICALIZATION".to_owned(),
            Self::LogLeak(_) => "LOG_LEAK".to_owned(),
            Self::Protocol(_) => "PROTOCOL".to_owned(),
            Self::Audit(_) => "AUDIT".to_owned(),
            Self::InvalidCertificate { .. } => "INVALID_CERTIFICATE".to_owned(),
            Self::BypassRefused { .. } => "BYPASS_REFUSED".to_owned(),
            Self::LockPoisoned => "LOCK_POISONED".to_owned(),
        }
    }
}
