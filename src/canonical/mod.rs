//! Canonical serializer.
//!
//! Deterministic encode+hash of any `serde::Serialize` value. The kernel and
//! the actuator each own a [`Canonicalizer`]; there is no shared state, so two
//! instances with the same [`CanonicalConfig`] agree byte-for-byte.
//!
//! Encoding rules:
//! - strings and keys are NFC-normalized
//! - object keys are sorted by UTF-8 byte order; non-string keys and keys that
//!   collide after normalization are rejected
//! - NaN and infinities are rejected unless `reject_non_finite` is off, in
//!   which case they become `{"__float__": "NaN" | "Infinity" | "-Infinity"}`
//! - byte payloads become `{"__bytes__": "<base64>"}`
//! - nesting deeper than `max_depth` is rejected

pub mod encoder;
pub mod hash;

use serde::Serialize;

pub use encoder::{CanonicalNode, BYTES_TAG, FLOAT_TAG};
pub use hash::{domain_hash, domain_hash_bytes, HashDomain, ZERO_HASH};

use crate::config::CanonicalConfig;

/// Errors raised while canonicalizing a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CanonicalizationError {
    /// The value uses a type the canonical form cannot represent.
    #[error("unsupported type: {kind}")]
    UnsupportedType {
        /// Description of the offending type.
        kind: String,
    },

    /// A map key did not serialize as a string.
    #[error("non-string map key: {kind}")]
    NonStringKey {
        /// Kind of key that was found.
        kind: String,
    },

    /// A NaN or infinite float was rejected.
    #[error("non-finite number rejected: {value}")]
    NonFiniteNumber {
        /// `NaN`, `Infinity` or `-Infinity`.
        value: String,
    },

    /// Two keys normalize to the same string.
    #[error("duplicate key after normalization: {key}")]
    DuplicateKey {
        /// The normalized key.
        key: String,
    },

    /// The value nests deeper than the configured limit.
    #[error("nesting depth {depth} exceeds limit {limit}")]
    MaxDepthExceeded {
        /// Depth reached.
        depth: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// Error raised by a `Serialize` impl.
    #[error("serialization failed: {0}")]
    Custom(String),
}

impl serde::ser::Error for CanonicalizationError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }
}

/// Canonical bytes and their domain-separated digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalResult {
    /// Canonical JSON encoding.
    pub bytes: Vec<u8>,
    /// Lower-case hex SHA-256 over `bytes` in the `Canonical` domain.
    pub hash: String,
}

impl CanonicalResult {
    fn from_bytes(bytes: Vec<u8>) -> Self {
        let hash = domain_hash(HashDomain::Canonical, &[&bytes]);
        Self { bytes, hash }
    }

    /// Canonical bytes as UTF-8 text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or_default()
    }
}

/// Canonical serializer instance.
#[derive(Debug, Clone, Default)]
pub struct Canonicalizer {
    config: CanonicalConfig,
}

impl Canonicalizer {
    /// Create a canonicalizer with the given rules.
    #[must_use]
    pub fn new(config: CanonicalConfig) -> Self {
        Self { config }
    }

    /// Rules this instance applies.
    #[must_use]
    pub fn config(&self) -> &CanonicalConfig {
        &self.config
    }

    /// Lower `value` into its normalized tree.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalizationError`] when the value violates an encoding rule.
    pub fn to_node<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<CanonicalNode, CanonicalizationError> {
        value.serialize(encoder::NodeSerializer::new(&self.config))
    }

    /// Canonicalize `value` into bytes and hash.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalizationError`] when the value violates an encoding rule.
    pub fn canonicalize<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<CanonicalResult, CanonicalizationError> {
        let node = self.to_node(value)?;
        Ok(CanonicalResult::from_bytes(node.to_bytes()))
    }

    /// Canonical hash of `value`.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalizationError`] when the value violates an encoding rule.
    pub fn hash_value<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<String, CanonicalizationError> {
        Ok(self.canonicalize(value)?.hash)
    }
}

/// True when both results carry identical bytes and identical hashes.
#[must_use]
pub fn verify_canonical_agreement(a: &CanonicalResult, b: &CanonicalResult) -> bool {
    a.bytes == b.bytes && a.hash == b.hash
}
