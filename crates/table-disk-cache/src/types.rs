//! Cache configuration and entry metadata

use std::time::Duration;

/// Configuration for a cache instance
///
/// There is no process-wide mutable default; every instance carries its own
/// configuration, overridable per call where an operation takes a TTL.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied to entries stored without an explicit TTL.
    /// `None` means such entries never expire.
    pub default_ttl: Option<Duration>,
    /// Upper bound on lock acquisition. `None` blocks indefinitely.
    pub lock_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Some(Duration::from_secs(3600)),
            lock_timeout: None,
        }
    }
}

/// One row of the metadata index
///
/// Owns exactly one blob file. Timestamps are UTC epoch milliseconds so
/// sub-second TTLs behave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EntryRow {
    pub key_digest: String,
    /// Canonical bytes of the caller key, verified on every lookup
    pub original_key: Vec<u8>,
    pub created_at: i64,
    pub last_accessed_at: i64,
    /// `None` means "use the cache-level default TTL at evaluation time"
    pub ttl_ms: Option<i64>,
    /// Blob file name relative to the blobs directory
    pub payload_file: String,
    pub payload_size: i64,
}

impl EntryRow {
    /// The TTL this entry expires against, in milliseconds.
    /// `None` means the entry never expires.
    pub fn effective_ttl_ms(&self, default_ttl: Option<Duration>) -> Option<i64> {
        match self.ttl_ms {
            Some(ms) => Some(ms),
            None => default_ttl.map(duration_ms),
        }
    }

    /// The single expiry predicate: expired iff
    /// `now >= last_accessed_at + effective_ttl`.
    ///
    /// "Expired" is never a stored state; every observing operation and
    /// `prune` evaluate this same predicate against their own `now`.
    pub fn is_expired(&self, now_ms: i64, default_ttl: Option<Duration>) -> bool {
        match self.effective_ttl_ms(default_ttl) {
            Some(ttl) => now_ms >= self.last_accessed_at.saturating_add(ttl),
            None => false,
        }
    }
}

/// Millisecond rendering of a TTL duration
pub(crate) fn duration_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

/// Diagnostic snapshot of one live entry's metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Normalized key identifier
    pub key_digest: String,
    /// UTC epoch milliseconds of first `set`
    pub created_at: i64,
    /// UTC epoch milliseconds of the most recent access
    pub last_accessed_at: i64,
    /// Per-entry TTL, when one was stored
    pub ttl: Option<Duration>,
    /// Payload byte length
    pub payload_size: u64,
}

impl From<&EntryRow> for EntryInfo {
    fn from(row: &EntryRow) -> Self {
        Self {
            key_digest: row.key_digest.clone(),
            created_at: row.created_at,
            last_accessed_at: row.last_accessed_at,
            ttl: row.ttl_ms.map(|ms| Duration::from_millis(ms.max(0) as u64)),
            payload_size: row.payload_size.max(0) as u64,
        }
    }
}
