//! Kernel-issued anchors and their single-use registry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::AcvError;
use crate::canonical::{domain_hash, HashDomain};

/// Kernel entropy tying a commitment to an environment digest and time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    /// `H(kernel_secret_material, commitment_hash, env_digest, timestamp)`.
    pub anchor_hash: String,
    /// Commitment this anchor answers.
    pub commitment_hash: String,
    /// UUIDv5 of the anchor hash under the kernel namespace.
    pub anchor_id: Uuid,
    /// Logical time of issuance.
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
struct AnchorRecord {
    anchor: Anchor,
    env_digest: String,
    used: bool,
}

/// Issued anchors keyed by hash, at most one per commitment.
pub struct AnchorRegistry {
    kernel_id: Uuid,
    material: Zeroizing<[u8; 32]>,
    records: BTreeMap<String, AnchorRecord>,
    by_commitment: BTreeMap<String, String>,
}

impl AnchorRegistry {
    /// Create an empty registry keyed on `material`.
    #[must_use]
    pub fn new(kernel_id: Uuid, material: [u8; 32]) -> Self {
        Self {
            kernel_id,
            material: Zeroizing::new(material),
            records: BTreeMap::new(),
            by_commitment: BTreeMap::new(),
        }
    }

    /// Issue the anchor for `commitment_hash`, recorded as unused.
    ///
    /// # Errors
    ///
    /// Returns [`AcvError::AlreadyAnchored`] if the commitment already has an anchor.
    pub fn issue(
        &mut self,
        commitment_hash: &str,
        env_digest: &str,
        timestamp: u64,
    ) -> Result<Anchor, AcvError> {
        if self.by_commitment.contains_key(commitment_hash) {
            return Err(AcvError::AlreadyAnchored {
                commitment_hash: commitment_hash.to_owned(),
            });
        }
        let anchor_hash = domain_hash(
            HashDomain::Anchor,
            &[
                self.material.as_slice(),
                commitment_hash.as_bytes(),
                env_digest.as_bytes(),
                &timestamp.to_be_bytes(),
            ],
        );
        let anchor = Anchor {
            anchor_id: Uuid::new_v5(&self.kernel_id, anchor_hash.as_bytes()),
            anchor_hash: anchor_hash.clone(),
            commitment_hash: commitment_hash.to_owned(),
            timestamp,
        };
        self.by_commitment
            .insert(commitment_hash.to_owned(), anchor_hash.clone());
        self.records.insert(
            anchor_hash,
            AnchorRecord {
                anchor: anchor.clone(),
                env_digest: env_digest.to_owned(),
                used: false,
            },
        );
        Ok(anchor)
    }

    /// The anchor with this hash, if this registry issued it.
    #[must_use]
    pub fn get(&self, anchor_hash: &str) -> Option<&Anchor> {
        self.records.get(anchor_hash).map(|r| &r.anchor)
    }

    /// Anchor issued for a commitment.
    #[must_use]
    pub fn for_commitment(&self, commitment_hash: &str) -> Option<&Anchor> {
        self.by_commitment
            .get(commitment_hash)
            .and_then(|hash| self.get(hash))
    }

    /// Environment digest the anchor was issued against.
    #[must_use]
    pub fn env_digest_of(&self, anchor_hash: &str) -> Option<&str> {
        self.records
            .get(anchor_hash)
            .map(|r| r.env_digest.as_str())
    }

    /// True when the registry issued exactly this anchor.
    #[must_use]
    pub fn is_issued(&self, anchor: &Anchor) -> bool {
        self.get(&anchor.anchor_hash) == Some(anchor)
    }

    /// True once the anchor has been consumed.
    #[must_use]
    pub fn is_used(&self, anchor_hash: &str) -> bool {
        self.records.get(anchor_hash).is_some_and(|r| r.used)
    }

    /// Consume the anchor.
    ///
    /// Returns `false` for an unknown or already-used anchor. Never fails.
    pub fn mark_used(&mut self, anchor_hash: &str) -> bool {
        match self.records.get_mut(anchor_hash) {
            Some(record) if !record.used => {
                record.used = true;
                true
            }
            _ => false,
        }
    }

    /// Anchors issued but never consumed.
    #[must_use]
    pub fn buried(&self) -> Vec<&Anchor> {
        self.records
            .values()
            .filter(|r| !r.used)
            .map(|r| &r.anchor)
            .collect()
    }

    /// Number of anchors issued.
    #[must_use]
    pub fn issued_count(&self) -> usize {
        self.records.len()
    }

    /// Number of anchors consumed.
    #[must_use]
    pub fn used_count(&self) -> usize {
        self.records.values().filter(|r| r.used).count()
    }
}

impl std::fmt::Debug for AnchorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnchorRegistry")
            .field("kernel_id", &self.kernel_id)
            .field("material", &"__REDACTED__")
            .field("issued", &self.records.len())
            .finish()
    }
}
