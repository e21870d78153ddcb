//! Sovereign actuation authority.
//!
//! A per-instance secret that can only be *bound* to an action hash. The
//! secret type has no `Clone`, `Serialize` or revealing `Debug`, is zeroized
//! on drop and is never handed out. The binding scheme is HMAC-SHA256 behind
//! [`ActuationSigner`] so a signature scheme can replace it at this seam.

pub mod leak;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::digest::{Key, KeyInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use sha2::Sha256;
use uuid::Uuid;
use zeroize::Zeroizing;

pub use leak::{assert_no_leaks_in, ActuationAuthorityLeakError, LEAK_SENTINEL};

use crate::canonical::{domain_hash, domain_hash_bytes, HashDomain};
use crate::types::ActuationBinding;

type HmacSha256 = Hmac<Sha256>;

/// Secret length: one SHA-256 block, the native HMAC key size.
const SECRET_LEN: usize = 64;

/// Checks bindings without the ability to create them.
pub trait BindingVerifier {
    /// True when `binding` was produced by this authority.
    fn verify_binding(&self, binding: &ActuationBinding) -> bool;
}

/// Produces bindings over action hashes.
pub trait ActuationSigner: BindingVerifier {
    /// Bind the authority to `action_hash`.
    fn bind_to_action(&mut self, action_hash: &str) -> ActuationBinding;

    /// Public fingerprint identifying this authority.
    fn fingerprint(&self) -> &str;
}

/// Raw key material. Deliberately neither `Clone` nor `Serialize`.
struct ActuationSecret(Zeroizing<[u8; SECRET_LEN]>);

impl ActuationSecret {
    fn mac(&self) -> HmacSha256 {
        let key = Key::<HmacSha256>::clone_from_slice(self.0.as_slice());
        <HmacSha256 as KeyInit>::new(&key)
    }
}

impl std::fmt::Debug for ActuationSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("__REDACTED__")
    }
}

/// The kernel's non-exportable actuation capability.
pub struct SovereignAuthority {
    kernel_id: Uuid,
    secret: ActuationSecret,
    fingerprint: String,
    next_index: u64,
}

impl SovereignAuthority {
    /// Create an authority with a fresh OS-random secret.
    #[must_use]
    pub fn generate(kernel_id: Uuid) -> Self {
        let mut bytes = Zeroizing::new([0u8; SECRET_LEN]);
        OsRng.fill_bytes(bytes.as_mut_slice());
        Self::from_secret(kernel_id, bytes)
    }

    /// Create an authority whose secret is derived from `seed`.
    ///
    /// Only for deterministic replay; a seeded secret is as strong as the seed.
    #[must_use]
    pub fn from_seed(kernel_id: Uuid, seed: u64) -> Self {
        let mut bytes = Zeroizing::new([0u8; SECRET_LEN]);
        for (half, chunk) in bytes.chunks_mut(32).enumerate() {
            let label: &[u8] = if half == 0 { b"authority-0" } else { b"authority-1" };
            let digest = domain_hash_bytes(
                HashDomain::SeedSecret,
                &[label, kernel_id.as_bytes(), &seed.to_be_bytes()],
            );
            chunk.copy_from_slice(&digest);
        }
        Self::from_secret(kernel_id, bytes)
    }

    fn from_secret(kernel_id: Uuid, bytes: Zeroizing<[u8; SECRET_LEN]>) -> Self {
        let fingerprint = domain_hash(HashDomain::AuthorityFingerprint, &[bytes.as_slice()]);
        Self {
            kernel_id,
            secret: ActuationSecret(bytes),
            fingerprint,
            next_index: 0,
        }
    }

    /// Kernel this authority belongs to.
    #[must_use]
    pub fn kernel_id(&self) -> Uuid {
        self.kernel_id
    }

    /// Number of bindings produced so far.
    #[must_use]
    pub fn bindings_issued(&self) -> u64 {
        self.next_index
    }

    fn binding_nonce(&self, index: u64) -> String {
        let mut mac = self.secret.mac();
        mac.update(HashDomain::BindingNonce.as_bytes());
        mac.update(&index.to_be_bytes());
        let tag = mac.finalize().into_bytes();
        hex::encode(&tag[..16])
    }

    fn signing_mac(&self, binding: &ActuationBinding) -> HmacSha256 {
        let mut mac = self.secret.mac();
        mac.update(HashDomain::BindingSignature.as_bytes());
        for part in [
            binding.action_hash.as_bytes(),
            binding.binding_nonce.as_bytes(),
            binding.authority_fingerprint.as_bytes(),
            binding.kernel_id.as_bytes().as_slice(),
            &binding.binding_index.to_be_bytes(),
        ] {
            let len = u64::try_from(part.len()).unwrap_or(u64::MAX);
            mac.update(&len.to_be_bytes());
            mac.update(part);
        }
        mac
    }

    /// Scan an outbound payload for the authority or any encoding of its secret.
    ///
    /// Performs the structural check of [`assert_no_leaks_in`] and then looks
    /// for the secret's hex and base64 renderings in every key and string.
    ///
    /// # Errors
    ///
    /// Returns [`ActuationAuthorityLeakError`] on the first hit.
    pub fn assert_no_leaks_in<T: Serialize + ?Sized>(
        &self,
        obj: &T,
    ) -> Result<(), ActuationAuthorityLeakError> {
        let value = leak::to_scannable(obj)?;
        let needles = self.secret_encodings();
        leak::scan_value(
            &value,
            |s| s.contains(LEAK_SENTINEL) || needles.iter().any(|n| s.contains(n.as_str())),
            "actuation secret",
        )
        .inspect_err(|e| {
            tracing::error!(path = %e.path, kernel_id = %self.kernel_id, "actuation secret leak blocked");
        })
    }

    fn secret_encodings(&self) -> Vec<Zeroizing<String>> {
        let raw = self.secret.0.as_slice();
        let mut out = vec![
            Zeroizing::new(hex::encode(raw)),
            Zeroizing::new(hex::encode_upper(raw)),
            Zeroizing::new(BASE64.encode(raw)),
        ];
        for half in raw.chunks(32) {
            out.push(Zeroizing::new(hex::encode(half)));
            out.push(Zeroizing::new(BASE64.encode(half)));
        }
        out
    }
}

impl BindingVerifier for SovereignAuthority {
    fn verify_binding(&self, binding: &ActuationBinding) -> bool {
        if binding.kernel_id != self.kernel_id || binding.authority_fingerprint != self.fingerprint {
            return false;
        }
        if binding.binding_nonce != self.binding_nonce(binding.binding_index) {
            return false;
        }
        let Ok(signature) = hex::decode(&binding.binding_signature) else {
            return false;
        };
        self.signing_mac(binding).verify_slice(&signature).is_ok()
    }
}

impl ActuationSigner for SovereignAuthority {
    fn bind_to_action(&mut self, action_hash: &str) -> ActuationBinding {
        let index = self.next_index;
        self.next_index = self.next_index.saturating_add(1);
        let mut binding = ActuationBinding {
            action_hash: action_hash.to_owned(),
            binding_signature: String::new(),
            binding_nonce: self.binding_nonce(index),
            authority_fingerprint: self.fingerprint.clone(),
            kernel_id: self.kernel_id,
            binding_index: index,
        };
        binding.binding_signature = hex::encode(self.signing_mac(&binding).finalize().into_bytes());
        tracing::debug!(binding_index = index, "authority bound to action");
        binding
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl Serialize for SovereignAuthority {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        tracing::error!(kernel_id = %self.kernel_id, "attempt to serialize the actuation authority");
        Err(S::Error::custom(format!(
            "{LEAK_SENTINEL}: the actuation authority cannot be serialized"
        )))
    }
}

impl std::fmt::Debug for SovereignAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SovereignAuthority")
            .field("kernel_id", &self.kernel_id)
            .field("fingerprint", &self.fingerprint)
            .field("secret", &self.secret)
            .finish()
    }
}
