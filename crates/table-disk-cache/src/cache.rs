//! Cache engine composing the index, blob store, and lock manager
//!
//! Every public operation is serialized per key digest by a file lock, so
//! threads in this process and other processes sharing the cache directory
//! observe consistent before-or-after states. Expiry is one predicate
//! ([`EntryRow::is_expired`]) evaluated lazily by every observing operation
//! and proactively by [`DiskCache::prune`]; it is never a stored state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::blob::BlobStore;
use crate::codec::PayloadCodec;
use crate::error::{CacheError, Result};
use crate::index::Index;
use crate::key::{self, NormalizedKey};
use crate::lock::LockManager;
use crate::types::{duration_ms, CacheConfig, EntryInfo, EntryRow};

/// Sequence number folded into blob file names so a replaced entry's new
/// blob never collides with the one it supersedes.
static BLOB_SEQ: AtomicU64 = AtomicU64::new(0);

/// Persistent, disk-backed TTL cache for serialized payloads
///
/// Stores each entry as a metadata row in an embedded SQLite index plus one
/// payload blob file, both under a single cache directory that may be shared
/// by multiple processes.
pub struct DiskCache<C> {
    dir: PathBuf,
    codec: C,
    config: CacheConfig,
    index: Index,
    blobs: BlobStore,
    locks: LockManager,
}

impl<C: PayloadCodec> DiskCache<C> {
    /// Open a cache at `dir` with the default configuration
    pub fn new(dir: impl Into<PathBuf>, codec: C) -> Result<Self> {
        Self::with_config(dir, codec, CacheConfig::default())
    }

    /// Open a cache at `dir` with an explicit configuration
    ///
    /// Creates the directory layout (`blobs/`, `tmp/`, `locks/`, the index
    /// database) on first use; nothing else is assumed to exist beneath
    /// `dir`.
    pub fn with_config(dir: impl Into<PathBuf>, codec: C, config: CacheConfig) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let cache = Self {
            index: Index::new(&dir),
            blobs: BlobStore::new(&dir),
            locks: LockManager::new(&dir, config.lock_timeout),
            dir,
            codec,
            config,
        };
        cache.blobs.init()?;
        cache.locks.init()?;
        cache.index.init()?;
        debug!(dir = %cache.dir.display(), "cache opened");
        Ok(cache)
    }

    /// Open a cache in the per-user default directory
    pub fn open_default(codec: C) -> Result<Self> {
        let dir = Self::default_dir().ok_or_else(|| {
            CacheError::Storage(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "home directory could not be resolved",
            ))
        })?;
        Self::new(dir, codec)
    }

    /// The per-user default cache directory (`~/.cache/table-disk-cache`)
    pub fn default_dir() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| home.join(".cache").join("table-disk-cache"))
    }

    /// The directory this cache owns
    pub fn cache_dir(&self) -> &Path {
        &self.dir
    }

    /// This cache's configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Fetch the value stored under `key`
    ///
    /// Returns `None` for absent, expired (lazily evicting it), or
    /// digest-colliding entries. A present entry whose payload cannot be
    /// decoded is a hard [`CacheError::Deserialization`], not a miss.
    pub fn get<K: Serialize + ?Sized>(&self, key: &K) -> Result<Option<C::Value>> {
        let nk = key::normalize(key)?;
        let _store = self.locks.store_shared()?;
        let _key = self.locks.key_lock(&nk.digest)?;

        let now = now_ms();
        let Some(row) = self.live_entry(&nk, now)? else {
            debug!(digest = %nk.digest, "cache miss");
            return Ok(None);
        };
        let Some(bytes) = self.blobs.read(&row.payload_file)? else {
            warn!(digest = %nk.digest, "payload missing, dropping stale entry");
            self.index.delete(&nk.digest)?;
            return Ok(None);
        };
        let value = self
            .codec
            .decode(&bytes)
            .map_err(CacheError::Deserialization)?;
        self.index.touch(&nk.digest, now, None)?;
        debug!(digest = %nk.digest, size = bytes.len(), "cache hit");
        Ok(Some(value))
    }

    /// Store `value` under `key`, replacing any prior entry
    ///
    /// `ttl` of `None` defers to the cache-level default TTL at every future
    /// expiry evaluation. The new blob is durably written before the index
    /// row that publishes it; the prior blob is removed only afterwards.
    pub fn set<K: Serialize + ?Sized>(
        &self,
        key: &K,
        value: &C::Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let nk = key::normalize(key)?;
        let bytes = self
            .codec
            .encode(value)
            .map_err(CacheError::Serialization)?;
        let _store = self.locks.store_shared()?;
        let _key = self.locks.key_lock(&nk.digest)?;

        let prior = self.index.lookup(&nk.digest)?;
        if let Some(prev) = &prior {
            if prev.original_key != nk.canonical {
                warn!(digest = %nk.digest, "digest collision, replacing entry for a different key");
            }
        }

        let now = now_ms();
        let payload_file = blob_file_name(&nk.digest);
        self.blobs.write(&payload_file, &bytes)?;
        self.index.upsert(&EntryRow {
            key_digest: nk.digest.clone(),
            original_key: nk.canonical.clone(),
            created_at: now,
            last_accessed_at: now,
            ttl_ms: ttl.map(duration_ms),
            payload_file: payload_file.clone(),
            payload_size: bytes.len() as i64,
        })?;
        if let Some(prev) = prior {
            if prev.payload_file != payload_file {
                self.blobs.remove(&prev.payload_file)?;
            }
        }
        debug!(digest = %nk.digest, size = bytes.len(), "entry stored");
        Ok(())
    }

    /// Replace the payload of an existing live entry
    ///
    /// Fails with [`CacheError::KeyNotFound`] when no live entry exists, and
    /// creates nothing in that case. `created_at` is preserved,
    /// `last_accessed_at` resets to now, and the stored TTL is replaced only
    /// when `ttl` is given.
    pub fn update<K: Serialize + ?Sized>(
        &self,
        key: &K,
        value: &C::Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let nk = key::normalize(key)?;
        let bytes = self
            .codec
            .encode(value)
            .map_err(CacheError::Serialization)?;
        let _store = self.locks.store_shared()?;
        let _key = self.locks.key_lock(&nk.digest)?;

        let now = now_ms();
        let Some(prev) = self.live_entry(&nk, now)? else {
            return Err(CacheError::KeyNotFound);
        };
        if !self.blobs.exists(&prev.payload_file) {
            warn!(digest = %nk.digest, "payload missing, dropping stale entry");
            self.index.delete(&nk.digest)?;
            return Err(CacheError::KeyNotFound);
        }

        let payload_file = blob_file_name(&nk.digest);
        self.blobs.write(&payload_file, &bytes)?;
        self.index.upsert(&EntryRow {
            key_digest: nk.digest.clone(),
            original_key: nk.canonical.clone(),
            created_at: prev.created_at,
            last_accessed_at: now,
            ttl_ms: ttl.map(duration_ms).or(prev.ttl_ms),
            payload_file: payload_file.clone(),
            payload_size: bytes.len() as i64,
        })?;
        if prev.payload_file != payload_file {
            self.blobs.remove(&prev.payload_file)?;
        }
        debug!(digest = %nk.digest, size = bytes.len(), "entry updated");
        Ok(())
    }

    /// Refresh a live entry's `last_accessed_at` (and TTL, when given)
    ///
    /// Returns `false` without creating anything when no live entry exists;
    /// an expired entry is lazily evicted like any other observation.
    pub fn touch<K: Serialize + ?Sized>(&self, key: &K, ttl: Option<Duration>) -> Result<bool> {
        let nk = key::normalize(key)?;
        let _store = self.locks.store_shared()?;
        let _key = self.locks.key_lock(&nk.digest)?;

        let now = now_ms();
        let Some(_row) = self.live_entry(&nk, now)? else {
            return Ok(false);
        };
        self.index.touch(&nk.digest, now, ttl.map(duration_ms))?;
        debug!(digest = %nk.digest, "entry touched");
        Ok(true)
    }

    /// Remove the entry under `key`, expired or not
    ///
    /// Returns whether something was removed; idempotent.
    pub fn delete<K: Serialize + ?Sized>(&self, key: &K) -> Result<bool> {
        let nk = key::normalize(key)?;
        let _store = self.locks.store_shared()?;
        let _key = self.locks.key_lock(&nk.digest)?;

        let Some(row) = self.index.lookup(&nk.digest)? else {
            return Ok(false);
        };
        if row.original_key != nk.canonical {
            return Ok(false);
        }
        self.index.delete(&nk.digest)?;
        self.blobs.remove(&row.payload_file)?;
        debug!(digest = %nk.digest, "entry deleted");
        Ok(true)
    }

    /// Whether a live entry exists under `key`
    ///
    /// Applies the same expiry predicate and lazy eviction as [`get`], but
    /// only checks that the payload file exists; it never reads or decodes
    /// the payload.
    ///
    /// [`get`]: DiskCache::get
    pub fn contains<K: Serialize + ?Sized>(&self, key: &K) -> Result<bool> {
        let nk = key::normalize(key)?;
        let _store = self.locks.store_shared()?;
        let _key = self.locks.key_lock(&nk.digest)?;

        let now = now_ms();
        let Some(row) = self.live_entry(&nk, now)? else {
            return Ok(false);
        };
        if !self.blobs.exists(&row.payload_file) {
            warn!(digest = %nk.digest, "payload missing, dropping stale entry");
            self.index.delete(&nk.digest)?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Metadata snapshot for the live entry under `key`, without touching it
    pub fn entry<K: Serialize + ?Sized>(&self, key: &K) -> Result<Option<EntryInfo>> {
        let nk = key::normalize(key)?;
        let _store = self.locks.store_shared()?;
        let _key = self.locks.key_lock(&nk.digest)?;

        let now = now_ms();
        let Some(row) = self.index.lookup(&nk.digest)? else {
            return Ok(None);
        };
        if row.original_key != nk.canonical || row.is_expired(now, self.config.default_ttl) {
            return Ok(None);
        }
        Ok(Some(EntryInfo::from(&row)))
    }

    /// Remove every expired entry and reconcile orphaned blob files
    ///
    /// Expiry is judged against a single `now` captured at the start of the
    /// call, so a long sweep treats all entries consistently. Returns the
    /// number of entries removed.
    pub fn prune(&self) -> Result<usize> {
        let now = now_ms();

        let expired: Vec<EntryRow> = {
            let _store = self.locks.store_shared()?;
            self.index
                .scan()?
                .into_iter()
                .filter(|row| row.is_expired(now, self.config.default_ttl))
                .collect()
        };

        let mut removed = 0;
        for row in expired {
            let _key = self.locks.key_lock(&row.key_digest)?;
            // The entry may have been touched or replaced since the scan.
            match self.index.lookup(&row.key_digest)? {
                Some(current) if current.is_expired(now, self.config.default_ttl) => {
                    self.index.delete(&current.key_digest)?;
                    self.blobs.remove(&current.payload_file)?;
                    debug!(digest = %current.key_digest, "expired entry pruned");
                    removed += 1;
                }
                _ => {}
            }
        }

        // Orphaned blobs can exist after a crash between a blob write and its
        // index commit. The exclusive store lock keeps in-flight writers out
        // while unreferenced files are reclaimed.
        let _store = self.locks.store_exclusive()?;
        let referenced = self.index.referenced_files()?;
        for file in self.blobs.list()? {
            if !referenced.contains(&file) {
                warn!(file = %file, "removing orphaned payload file");
                let _ = self.blobs.remove(&file);
            }
        }
        self.blobs.sweep_partials()?;

        debug!(removed, "prune complete");
        Ok(removed)
    }

    /// Look up the row for a normalized key and lazily evict it if expired.
    ///
    /// `None` covers absent rows, digest collisions with a different
    /// original key, and entries that just expired.
    fn live_entry(&self, nk: &NormalizedKey, now: i64) -> Result<Option<EntryRow>> {
        let Some(row) = self.index.lookup(&nk.digest)? else {
            return Ok(None);
        };
        if row.original_key != nk.canonical {
            debug!(digest = %nk.digest, "digest matched a different original key");
            return Ok(None);
        }
        if row.is_expired(now, self.config.default_ttl) {
            debug!(digest = %nk.digest, "entry expired, evicting");
            self.index.delete(&nk.digest)?;
            self.blobs.remove(&row.payload_file)?;
            return Ok(None);
        }
        Ok(Some(row))
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn blob_file_name(digest: &str) -> String {
    let seq = BLOB_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{digest}-{:x}-{seq:x}.bin", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use serde::Deserialize;
    use std::fs;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        qty: u32,
    }

    type Table = Vec<Row>;

    fn sample_table() -> Table {
        vec![
            Row {
                name: "alpha".to_string(),
                qty: 3,
            },
            Row {
                name: "beta".to_string(),
                qty: 7,
            },
        ]
    }

    fn cache_at(dir: &Path) -> DiskCache<JsonCodec<Table>> {
        DiskCache::new(dir, JsonCodec::new()).unwrap()
    }

    fn cache() -> (tempfile::TempDir, DiskCache<JsonCodec<Table>>) {
        let dir = tempdir().unwrap();
        let cache = cache_at(dir.path());
        (dir, cache)
    }

    fn sleep_ms(ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }

    /// The single blob file currently on disk
    fn only_blob(cache: &DiskCache<JsonCodec<Table>>) -> PathBuf {
        let files = cache.blobs.list().unwrap();
        assert_eq!(files.len(), 1);
        cache.dir.join("blobs").join(&files[0])
    }

    #[test]
    fn test_set_get_round_trip() {
        let (_dir, cache) = cache();
        let table = sample_table();
        cache.set("dataset", &table, None).unwrap();
        assert_eq!(cache.get("dataset").unwrap().unwrap(), table);
        assert!(cache.contains("dataset").unwrap());
    }

    #[test]
    fn test_get_missing_key() {
        let (_dir, cache) = cache();
        assert!(cache.get("nothing here").unwrap().is_none());
        assert!(!cache.contains("nothing here").unwrap());
    }

    #[test]
    fn test_ttl_expiry() {
        let (_dir, cache) = cache();
        cache
            .set("short", &sample_table(), Some(Duration::from_millis(50)))
            .unwrap();
        sleep_ms(120);
        assert!(cache.get("short").unwrap().is_none());
        assert!(!cache.contains("short").unwrap());
    }

    #[test]
    fn test_sliding_ttl_via_touch() {
        let (_dir, cache) = cache();
        cache
            .set("sliding", &sample_table(), Some(Duration::from_millis(300)))
            .unwrap();
        sleep_ms(200);
        assert!(cache.touch("sliding", None).unwrap());
        // 400 ms since creation but only 200 ms since the touch
        sleep_ms(200);
        assert!(cache.get("sliding").unwrap().is_some());
        sleep_ms(400);
        assert!(cache.get("sliding").unwrap().is_none());
    }

    #[test]
    fn test_get_refreshes_last_access() {
        let (_dir, cache) = cache();
        cache
            .set("refresh", &sample_table(), Some(Duration::from_millis(300)))
            .unwrap();
        sleep_ms(200);
        assert!(cache.get("refresh").unwrap().is_some());
        sleep_ms(200);
        // 400 ms since creation, 200 ms since the read that refreshed it
        assert!(cache.contains("refresh").unwrap());
    }

    #[test]
    fn test_touch_absent_and_expired() {
        let (_dir, cache) = cache();
        assert!(!cache.touch("never set", None).unwrap());
        cache
            .set("expiring", &sample_table(), Some(Duration::from_millis(50)))
            .unwrap();
        sleep_ms(120);
        assert!(!cache.touch("expiring", None).unwrap());
        assert!(cache.entry("expiring").unwrap().is_none());
    }

    #[test]
    fn test_touch_replaces_ttl_when_given() {
        let (_dir, cache) = cache();
        cache
            .set("retimed", &sample_table(), Some(Duration::from_millis(50)))
            .unwrap();
        assert!(cache
            .touch("retimed", Some(Duration::from_secs(60)))
            .unwrap());
        sleep_ms(120);
        assert!(cache.contains("retimed").unwrap());
    }

    #[test]
    fn test_idempotent_delete() {
        let (_dir, cache) = cache();
        assert!(!cache.delete("absent").unwrap());
        cache.set("doomed", &sample_table(), None).unwrap();
        assert!(cache.delete("doomed").unwrap());
        assert!(!cache.delete("doomed").unwrap());
        assert!(cache.get("doomed").unwrap().is_none());
    }

    #[test]
    fn test_delete_removes_expired_entry_too() {
        let (_dir, cache) = cache();
        cache
            .set("stale", &sample_table(), Some(Duration::from_millis(50)))
            .unwrap();
        sleep_ms(120);
        assert!(cache.delete("stale").unwrap());
        assert!(cache.blobs.list().unwrap().is_empty());
    }

    #[test]
    fn test_collision_returns_none_for_other_key() {
        let (_dir, cache) = cache();
        cache.set("alpha", &sample_table(), None).unwrap();

        // Forge a digest collision: the row under alpha's digest now claims
        // to belong to a different original key.
        let digest = key::normalize("alpha").unwrap().digest;
        let mut row = cache.index.lookup(&digest).unwrap().unwrap();
        row.original_key = key::normalize("beta").unwrap().canonical;
        cache.index.upsert(&row).unwrap();

        assert!(cache.get("alpha").unwrap().is_none());
        assert!(!cache.contains("alpha").unwrap());
        // The colliding entry itself is left alone
        assert!(cache.index.lookup(&digest).unwrap().is_some());
    }

    #[test]
    fn test_update_missing_key_fails_and_creates_nothing() {
        let (_dir, cache) = cache();
        let err = cache.update("ghost", &sample_table(), None).unwrap_err();
        assert!(matches!(err, CacheError::KeyNotFound));
        assert!(!cache.contains("ghost").unwrap());
        assert!(cache.blobs.list().unwrap().is_empty());
    }

    #[test]
    fn test_update_expired_key_fails() {
        let (_dir, cache) = cache();
        cache
            .set("fading", &sample_table(), Some(Duration::from_millis(50)))
            .unwrap();
        sleep_ms(120);
        let err = cache.update("fading", &sample_table(), None).unwrap_err();
        assert!(matches!(err, CacheError::KeyNotFound));
        assert!(!cache.contains("fading").unwrap());
    }

    #[test]
    fn test_update_preserves_created_at() {
        let (_dir, cache) = cache();
        cache.set("dataset", &sample_table(), None).unwrap();
        let before = cache.entry("dataset").unwrap().unwrap();

        sleep_ms(20);
        let mut table = sample_table();
        table[0].qty = 99;
        cache.update("dataset", &table, None).unwrap();

        let after = cache.entry("dataset").unwrap().unwrap();
        assert_eq!(after.created_at, before.created_at);
        assert!(after.last_accessed_at > before.last_accessed_at);
        assert_eq!(cache.get("dataset").unwrap().unwrap(), table);
    }

    #[test]
    fn test_update_retains_ttl_unless_given() {
        let (_dir, cache) = cache();
        cache
            .set("dataset", &sample_table(), Some(Duration::from_secs(10)))
            .unwrap();
        cache.update("dataset", &sample_table(), None).unwrap();
        let info = cache.entry("dataset").unwrap().unwrap();
        assert_eq!(info.ttl, Some(Duration::from_secs(10)));

        cache
            .update("dataset", &sample_table(), Some(Duration::from_secs(20)))
            .unwrap();
        let info = cache.entry("dataset").unwrap().unwrap();
        assert_eq!(info.ttl, Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_set_replaces_blob() {
        let (_dir, cache) = cache();
        cache.set("dataset", &sample_table(), None).unwrap();
        let mut table = sample_table();
        table.push(Row {
            name: "gamma".to_string(),
            qty: 11,
        });
        cache.set("dataset", &table, None).unwrap();

        assert_eq!(cache.get("dataset").unwrap().unwrap(), table);
        // The superseded blob is gone
        assert_eq!(cache.blobs.list().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_blob_is_miss_with_cleanup() {
        let (_dir, cache) = cache();
        cache.set("dataset", &sample_table(), None).unwrap();
        fs::remove_file(only_blob(&cache)).unwrap();

        assert!(cache.get("dataset").unwrap().is_none());
        let digest = key::normalize("dataset").unwrap().digest;
        assert!(cache.index.lookup(&digest).unwrap().is_none());
    }

    #[test]
    fn test_missing_blob_is_miss_for_contains() {
        let (_dir, cache) = cache();
        cache.set("dataset", &sample_table(), None).unwrap();
        fs::remove_file(only_blob(&cache)).unwrap();

        assert!(!cache.contains("dataset").unwrap());
        let digest = key::normalize("dataset").unwrap().digest;
        assert!(cache.index.lookup(&digest).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_payload_is_hard_error() {
        let (_dir, cache) = cache();
        cache.set("dataset", &sample_table(), None).unwrap();
        fs::write(only_blob(&cache), b"not a table").unwrap();

        // contains never decodes, so the entry still looks live
        assert!(cache.contains("dataset").unwrap());
        let err = cache.get("dataset").unwrap_err();
        assert!(matches!(err, CacheError::Deserialization(_)));
    }

    #[test]
    fn test_prune_removes_exactly_the_expired() {
        let (_dir, cache) = cache();
        cache
            .set("old-1", &sample_table(), Some(Duration::from_millis(50)))
            .unwrap();
        cache
            .set("old-2", &sample_table(), Some(Duration::from_millis(50)))
            .unwrap();
        cache
            .set("new-1", &sample_table(), Some(Duration::from_secs(60)))
            .unwrap();
        cache.set("new-2", &sample_table(), None).unwrap();
        sleep_ms(120);

        assert_eq!(cache.prune().unwrap(), 2);
        assert!(!cache.contains("old-1").unwrap());
        assert!(!cache.contains("old-2").unwrap());
        assert!(cache.contains("new-1").unwrap());
        assert!(cache.contains("new-2").unwrap());
        assert_eq!(cache.prune().unwrap(), 0);
    }

    #[test]
    fn test_prune_reclaims_orphaned_blobs() {
        let (_dir, cache) = cache();
        cache.set("kept", &sample_table(), None).unwrap();

        // A crash between blob write and index commit leaves a file no row
        // references.
        let orphan = cache.dir.join("blobs").join("feedface-1-1.bin");
        fs::write(&orphan, b"orphan").unwrap();
        let partial = cache.dir.join("tmp").join("feedface-1-2.bin.partial");
        fs::write(&partial, b"partial").unwrap();

        assert_eq!(cache.prune().unwrap(), 0);
        assert!(!orphan.exists());
        assert!(!partial.exists());
        assert!(cache.contains("kept").unwrap());
    }

    #[test]
    fn test_composite_keys() {
        let (_dir, cache) = cache();
        cache
            .set(&("dataset", 1u32), &sample_table(), None)
            .unwrap();
        assert!(cache.contains(&("dataset", 1u32)).unwrap());
        assert!(!cache.contains(&("dataset", 2u32)).unwrap());
    }

    #[test]
    fn test_shared_directory_between_instances() {
        let dir = tempdir().unwrap();
        let writer = cache_at(dir.path());
        let reader = cache_at(dir.path());

        writer.set("dataset", &sample_table(), None).unwrap();
        assert_eq!(reader.get("dataset").unwrap().unwrap(), sample_table());

        assert!(reader.delete("dataset").unwrap());
        assert!(!writer.contains("dataset").unwrap());
    }

    #[test]
    fn test_concurrent_set_get_same_key() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(DiskCache::new(dir.path(), JsonCodec::<Vec<u64>>::new()).unwrap());
        cache.set("hot", &vec![0; 64], None).unwrap();

        let mut handles = Vec::new();
        for writer_id in 1..=3u64 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for _ in 0..20 {
                    cache.set("hot", &vec![writer_id; 64], None).unwrap();
                }
            }));
        }
        for _ in 0..2 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for _ in 0..30 {
                    // Reads racing writers must never observe a torn payload
                    let value = cache.get("hot").unwrap().expect("entry must stay live");
                    assert_eq!(value.len(), 64);
                    assert!(value.iter().all(|v| *v == value[0]));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let final_value = cache.get("hot").unwrap().unwrap();
        assert!(final_value.iter().all(|v| *v == final_value[0]));
        assert!((1..=3).contains(&final_value[0]));
        assert_eq!(cache.blobs.list().unwrap().len(), 1);
    }

    #[test]
    fn test_lock_timeout_surfaces() {
        let dir = tempdir().unwrap();
        let config = CacheConfig {
            default_ttl: Some(Duration::from_secs(3600)),
            lock_timeout: Some(Duration::from_millis(50)),
        };
        let cache =
            DiskCache::with_config(dir.path(), JsonCodec::<Table>::new(), config).unwrap();
        cache.set("dataset", &sample_table(), None).unwrap();

        let digest = key::normalize("dataset").unwrap().digest;
        let _held = cache.locks.key_lock(&digest).unwrap();
        let err = cache.get("dataset").unwrap_err();
        assert!(matches!(err, CacheError::LockTimeout { .. }));
    }
}
