//! Error types for the disk cache

use std::fmt;
use std::time::Duration;

/// Boxed error produced by a payload codec.
pub type CodecError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur when operating on the cache
#[derive(Debug)]
pub enum CacheError {
    /// The caller-supplied key could not be canonically serialized
    KeyEncoding(serde_json::Error),
    /// The payload codec failed to encode a value
    Serialization(CodecError),
    /// The payload codec failed to decode stored bytes
    Deserialization(CodecError),
    /// `update` was called for a key with no live entry
    KeyNotFound,
    /// A lock could not be acquired within the configured timeout
    LockTimeout {
        /// How long the caller waited before giving up
        waited: Duration,
    },
    /// The metadata index failed
    Index(rusqlite::Error),
    /// Blob or lock file I/O failed
    Storage(std::io::Error),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyEncoding(e) => write!(f, "cache key cannot be canonicalized: {}", e),
            Self::Serialization(e) => write!(f, "payload encoding failed: {}", e),
            Self::Deserialization(e) => write!(f, "payload decoding failed: {}", e),
            Self::KeyNotFound => write!(f, "no live cache entry for key"),
            Self::LockTimeout { waited } => {
                write!(f, "lock acquisition timed out after {:?}", waited)
            }
            Self::Index(e) => write!(f, "cache index error: {}", e),
            Self::Storage(e) => write!(f, "cache storage error: {}", e),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::KeyEncoding(e) => Some(e),
            Self::Serialization(e) | Self::Deserialization(e) => Some(e.as_ref()),
            Self::KeyNotFound | Self::LockTimeout { .. } => None,
            Self::Index(e) => Some(e),
            Self::Storage(e) => Some(e),
        }
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Index(e)
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e)
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
