//! Canonical key normalization
//!
//! Any `serde::Serialize` value can act as a cache key. Its canonical form is
//! the serde_json encoding; the index key and blob file stem are the SHA-256
//! digest of those bytes. Composite keys must serialize deterministically
//! (ordered maps, not `HashMap`).

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};

/// A caller key reduced to its canonical bytes and digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NormalizedKey {
    /// Lowercase hex SHA-256 of the canonical bytes (64 chars)
    pub digest: String,
    /// Canonical serde_json encoding of the caller key
    pub canonical: Vec<u8>,
}

/// Normalize a caller key into its digest and canonical form
pub(crate) fn normalize<K: Serialize + ?Sized>(key: &K) -> Result<NormalizedKey> {
    let canonical = serde_json::to_vec(key).map_err(CacheError::KeyEncoding)?;
    let digest = hex::encode(Sha256::digest(&canonical));
    Ok(NormalizedKey { digest, canonical })
}
