// crates/nerve-core/src/model/hashing.rs
// ============================================================================
// Module: Context Nerve Canonical Hashing
// Description: RFC 8785 canonical JSON digests for audit chaining and allowlists.
// Purpose: Give audit entries and signed allowlist payloads stable byte forms.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Every hash in Context Nerve is SHA-256 over RFC 8785 (JCS) canonical JSON.
//! The audit log links entries by folding the previous entry digest into the
//! next one; see [`chain_digest`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256.
    Sha256,
}

/// Content digest with its algorithm label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDigest {
    /// Algorithm used to compute the digest.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest.
    pub value: String,
}

impl HashDigest {
    /// Computes a SHA-256 digest of raw bytes.
    #[must_use]
    pub fn sha256(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self {
            algorithm: HashAlgorithm::Sha256,
            value: hex_encode(&digest),
        }
    }
}

/// Errors raised when computing canonical digests.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns RFC 8785 canonical JSON bytes for a value.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes the canonical JSON form of a value.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn hash_canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<HashDigest, HashError> {
    Ok(HashDigest::sha256(&canonical_json_bytes(value)?))
}

/// Folds a sequence number, the previous link, and a body digest into one link digest.
///
/// The genesis entry uses `None` for `prev`.
#[must_use]
pub fn chain_digest(sequence: u64, prev: Option<&HashDigest>, body: &HashDigest) -> HashDigest {
    let mut hasher = Sha256::new();
    hasher.update(sequence.to_be_bytes());
    hasher.update(prev.map_or("genesis", |digest| digest.value.as_str()).as_bytes());
    hasher.update(b":");
    hasher.update(body.value.as_bytes());
    HashDigest {
        algorithm: HashAlgorithm::Sha256,
        value: hex_encode(&hasher.finalize()),
    }
}

/// Encodes bytes as lowercase hex.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}
