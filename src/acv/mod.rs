//! Anchor-Commit-Verify protocol.
//!
//! Commitment hashing ([`commitment`]), anchor issuance and single-use
//! tracking ([`anchor`]), the per-proposal state machine ([`state`]) and the
//! interchangeable coupling witnesses ([`coupling`]). The gate that composes
//! them lives in `kernel::gate`.

pub mod anchor;
pub mod commitment;
pub mod coupling;
pub mod state;

pub use anchor::{Anchor, AnchorRegistry};
pub use commitment::{
    compute_commitment_hash, generate_nonce, nonce_ref, seeded_nonce, Commitment,
    RegisteredCommitment,
};
pub use coupling::{CouplingError, CouplingInput, CouplingPattern, CouplingWitness};
pub use state::{AcvState, AcvTracker};

/// Protocol sequencing errors outside the named invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcvError {
    /// The commitment was never registered.
    #[error("unknown commitment: {commitment_hash}")]
    UnknownCommitment {
        /// Commitment hash looked up.
        commitment_hash: String,
    },

    /// The commitment was registered twice.
    #[error("commitment already registered: {commitment_hash}")]
    DuplicateCommitment {
        /// Commitment hash.
        commitment_hash: String,
    },

    /// The commitment already has its anchor.
    #[error("commitment already anchored: {commitment_hash}")]
    AlreadyAnchored {
        /// Commitment hash.
        commitment_hash: String,
    },

    /// The requested state transition is not allowed.
    #[error("invalid ACV transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state.
        from: AcvState,
        /// Requested state.
        to: AcvState,
    },
}

/// `commit < anchor < reveal`, strictly.
#[must_use]
pub fn temporal_order_holds(commit_ts: u64, anchor_ts: u64, reveal_ts: u64) -> bool {
    commit_ts < anchor_ts && anchor_ts < reveal_ts
}
