//! Per-proposal ACV state machine.
//!
//! `NONE -> COMMITTED -> ANCHORED -> REVEALED -> (VERIFIED | REJECTED)`.
//! A rejected proposal may be revealed again; a verified one stays verified.

use std::collections::BTreeMap;

use serde::Serialize;

use super::AcvError;

/// Protocol stage of one commitment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcvState {
    /// Never registered.
    #[default]
    None,
    /// Commitment registered.
    Committed,
    /// Anchor issued.
    Anchored,
    /// Proposal revealed, verdict pending.
    Revealed,
    /// Certificate issued.
    Verified,
    /// Reveal failed a gate.
    Rejected,
}

/// Tracks [`AcvState`] per commitment hash.
#[derive(Debug, Default)]
pub struct AcvTracker {
    states: BTreeMap<String, AcvState>,
}

impl AcvTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state; [`AcvState::None`] for unknown commitments.
    #[must_use]
    pub fn state(&self, commitment_hash: &str) -> AcvState {
        self.states
            .get(commitment_hash)
            .copied()
            .unwrap_or_default()
    }

    /// `NONE -> COMMITTED`.
    ///
    /// # Errors
    ///
    /// Returns [`AcvError::DuplicateCommitment`] if already registered.
    pub fn commit(&mut self, commitment_hash: &str) -> Result<(), AcvError> {
        if self.state(commitment_hash) != AcvState::None {
            return Err(AcvError::DuplicateCommitment {
                commitment_hash: commitment_hash.to_owned(),
            });
        }
        self.states
            .insert(commitment_hash.to_owned(), AcvState::Committed);
        Ok(())
    }

    /// `COMMITTED -> ANCHORED`.
    ///
    /// # Errors
    ///
    /// Returns [`AcvError::UnknownCommitment`] or [`AcvError::AlreadyAnchored`].
    pub fn anchor(&mut self, commitment_hash: &str) -> Result<(), AcvError> {
        match self.state(commitment_hash) {
            AcvState::Committed => {
                self.states
                    .insert(commitment_hash.to_owned(), AcvState::Anchored);
                Ok(())
            }
            AcvState::None => Err(AcvError::UnknownCommitment {
                commitment_hash: commitment_hash.to_owned(),
            }),
            _ => Err(AcvError::AlreadyAnchored {
                commitment_hash: commitment_hash.to_owned(),
            }),
        }
    }

    /// `ANCHORED | REJECTED -> REVEALED`. A verified commitment is left as is.
    ///
    /// # Errors
    ///
    /// Returns [`AcvError::InvalidTransition`] before an anchor exists.
    pub fn reveal(&mut self, commitment_hash: &str) -> Result<(), AcvError> {
        match self.state(commitment_hash) {
            AcvState::Anchored | AcvState::Rejected | AcvState::Revealed => {
                self.states
                    .insert(commitment_hash.to_owned(), AcvState::Revealed);
                Ok(())
            }
            AcvState::Verified => Ok(()),
            from => Err(AcvError::InvalidTransition {
                from,
                to: AcvState::Revealed,
            }),
        }
    }

    /// `REVEALED -> VERIFIED | REJECTED`. A verified commitment is never downgraded.
    pub fn resolve(&mut self, commitment_hash: &str, verified: bool) {
        match self.state(commitment_hash) {
            AcvState::Verified | AcvState::None => {}
            _ => {
                let next = if verified {
                    AcvState::Verified
                } else {
                    AcvState::Rejected
                };
                self.states.insert(commitment_hash.to_owned(), next);
            }
        }
    }

    /// Count of commitments in each state.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let mut out = BTreeMap::new();
        for state in self.states.values() {
            let label = format!("{state:?}").to_uppercase();
            let slot = out.entry(label).or_insert(0usize);
            *slot = slot.saturating_add(1);
        }
        out
    }
}
