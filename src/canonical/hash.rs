//! Typed domain separators and SHA-256 content hashing.
//!
//! Every hash the kernel computes selects a [`HashDomain`]. Parts are
//! length-prefixed so that `("ab", "c")` and `("a", "bc")` never collide.

use sha2::{Digest, Sha256};

/// Genesis `prev_hash` for the audit chain: 64 zero hex digits.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Declares `HashDomain`, `as_bytes()` and `ALL` from one list.
macro_rules! define_hash_domains {
    (
        $(
            $(#[$meta:meta])*
            $variant:ident => $bytes:expr
        ),+ $(,)?
    ) => {
        /// Domain separator prefixed to every kernel hash.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum HashDomain {
            $(
                $(#[$meta])*
                $variant,
            )+
        }

        impl HashDomain {
            /// Raw null-terminated separator bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &'static [u8] {
                match self {
                    $( Self::$variant => $bytes, )+
                }
            }

            /// All domains in declaration order.
            pub const ALL: &'static [HashDomain] = &[
                $( Self::$variant, )+
            ];
        }
    };
}

define_hash_domains! {
    /// Canonical value digest returned by the serializer.
    Canonical => b"AK::CANONICAL::V1\0",
    /// Proposer commitment over (proposal, nonce, kernel key).
    Commitment => b"AK::COMMITMENT::V1\0",
    /// Public reference to a commitment nonce.
    NonceRef => b"AK::NONCE_REF::V1\0",
    /// Kernel-issued anchor.
    Anchor => b"AK::ANCHOR::V1\0",
    /// Merkle leaf for coupling pattern A.
    MerkleLeaf => b"AK::COUPLING_MERKLE_LEAF::V1\0",
    /// Merkle interior node for coupling pattern A.
    MerkleNode => b"AK::COUPLING_MERKLE_NODE::V1\0",
    /// Opening selection challenge for coupling pattern A.
    MerkleChallenge => b"AK::COUPLING_MERKLE_CHALLENGE::V1\0",
    /// Chained mix for coupling pattern B.
    GlobalMix => b"AK::COUPLING_GLOBAL_MIX::V1\0",
    /// Transition edge hash for coupling pattern C.
    TransitionEdge => b"AK::COUPLING_EDGE::V1\0",
    /// Edge selection predicate for coupling pattern C.
    EdgePredicate => b"AK::COUPLING_EDGE_PREDICATE::V1\0",
    /// Recomposed action identity.
    ActionHash => b"AK::ACTION::V1\0",
    /// Actuation binding MAC input.
    BindingSignature => b"AK::BINDING_SIGNATURE::V1\0",
    /// Actuation binding nonce derivation.
    BindingNonce => b"AK::BINDING_NONCE::V1\0",
    /// Public fingerprint of the actuation secret.
    AuthorityFingerprint => b"AK::AUTHORITY_FINGERPRINT::V1\0",
    /// Seeded derivation of kernel secrets for replay runs.
    SeedSecret => b"AK::SEED_SECRET::V1\0",
    /// Audit log entry hash.
    AuditEntry => b"AK::AUDIT_ENTRY::V1\0",
}

/// Hash `parts` under `domain`, returning raw digest bytes.
#[must_use]
pub fn domain_hash_bytes(domain: HashDomain, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    for part in parts {
        let len = u64::try_from(part.len()).unwrap_or(u64::MAX);
        hasher.update(len.to_be_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Hash `parts` under `domain`, returning lower-case hex.
#[must_use]
pub fn domain_hash(domain: HashDomain, parts: &[&[u8]]) -> String {
    hex::encode(domain_hash_bytes(domain, parts))
}
