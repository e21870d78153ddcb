//! Proposer-side commitments.
//!
//! `commitment_hash = H(canonical(proposal), nonce, kernel_public_key)`. The
//! kernel only ever stores the [`RegisteredCommitment`] view, so it learns
//! neither the proposal nor the nonce before reveal.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::canonical::{domain_hash, CanonicalizationError, Canonicalizer, HashDomain};

/// A proposer's sealed commitment to a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    /// `H(canonical(proposal), nonce, kernel_public_key)`.
    pub commitment_hash: String,
    /// Hex nonce. Kept by the proposer until reveal.
    pub nonce: String,
    /// `H(nonce)`, safe to hand to the kernel.
    pub nonce_ref: String,
    /// Canonical hash of the committed proposal.
    pub proposal_hash: String,
    /// Logical time of commitment.
    pub timestamp: u64,
}

impl Commitment {
    /// Seal `proposal` under `nonce` for the kernel identified by `kernel_public_key`.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalizationError`] if the proposal cannot be canonicalized.
    pub fn create<T: Serialize + ?Sized>(
        canon: &Canonicalizer,
        proposal: &T,
        nonce: &str,
        kernel_public_key: &str,
        timestamp: u64,
    ) -> Result<Self, CanonicalizationError> {
        let canonical = canon.canonicalize(proposal)?;
        Ok(Self {
            commitment_hash: compute_commitment_hash(&canonical.bytes, nonce, kernel_public_key),
            nonce: nonce.to_owned(),
            nonce_ref: nonce_ref(nonce),
            proposal_hash: canonical.hash,
            timestamp,
        })
    }

    /// The nonce-free view the kernel registers.
    #[must_use]
    pub fn registered(&self) -> RegisteredCommitment {
        RegisteredCommitment {
            commitment_hash: self.commitment_hash.clone(),
            nonce_ref: self.nonce_ref.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// What the kernel keeps about a commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredCommitment {
    /// Registered commitment hash.
    pub commitment_hash: String,
    /// Reference to the undisclosed nonce.
    pub nonce_ref: String,
    /// Logical time of commitment.
    pub timestamp: u64,
}

/// Commitment hash over canonical proposal bytes.
#[must_use]
pub fn compute_commitment_hash(canonical_bytes: &[u8], nonce: &str, kernel_public_key: &str) -> String {
    domain_hash(
        HashDomain::Commitment,
        &[canonical_bytes, nonce.as_bytes(), kernel_public_key.as_bytes()],
    )
}

/// Public reference to a nonce.
#[must_use]
pub fn nonce_ref(nonce: &str) -> String {
    domain_hash(HashDomain::NonceRef, &[nonce.as_bytes()])
}

/// Fresh 256-bit nonce from the OS RNG, hex encoded.
#[must_use]
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Deterministic nonce for replayable runs.
#[must_use]
pub fn seeded_nonce(seed: u64, index: u64) -> String {
    domain_hash(
        HashDomain::SeedSecret,
        &[b"nonce", &seed.to_be_bytes(), &index.to_be_bytes()],
    )
}
