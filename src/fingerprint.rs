//! Deterministic digests for schema sources and compiled models.
//!
//! Digests are domain-separated, length-prefixed SHA-256 values. They
//! identify a schema across recompiles (line endings normalized) and
//! key the compiled model store.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

use crate::codec;
use crate::model::LvsModel;

/// A 256-bit digest value.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest([u8; 32]);

impl Digest {
    /// The all-zero digest.
    #[inline]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Creates a digest from a raw byte array.
    #[inline]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw byte array.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes SHA-256 of `data` under a domain-separation prefix.
    ///
    /// The input is `LVS:<domain>:v1 || length_prefix(data) || data`,
    /// with a 64-bit little-endian length prefix.
    pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"LVS:");
        hasher.update(domain);
        hasher.update(b":v1");
        hasher.update((data.len() as u64).to_le_bytes());
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Lowercase hex form, suitable for file names.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for b in &self.0 {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Show the first 4 bytes in hex for readability.
        write!(
            f,
            "Digest({:02x}{:02x}{:02x}{:02x}…)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Digest of schema source text. CRLF line endings are normalized so a
/// checked-out copy hashes the same on every platform.
pub fn digest_source(source: &str) -> Digest {
    let normalized = source.replace("\r\n", "\n");
    Digest::hash_with_domain(b"source", normalized.as_bytes())
}

/// Digest of a compiled model's wire form.
pub fn digest_model(model: &LvsModel) -> Digest {
    Digest::hash_with_domain(b"model", &codec::encode(model))
}
