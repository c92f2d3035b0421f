//! Advisory file locks shared across threads and processes
//!
//! Two granularities: a store-level lock (shared for point operations and
//! prune's scan, exclusive for the orphan sweep) and one exclusive lock per
//! key digest. Lock files are opened fresh on every acquisition, so the same
//! flock discipline serializes threads within one process and separate
//! processes alike. Acquisition blocks; with a configured timeout the
//! contended path polls until the deadline and fails instead of deadlocking.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs4::FileExt;

use crate::error::{CacheError, Result};

const LOCKS_DIR: &str = "locks";
const STORE_LOCK: &str = "store.lock";
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

/// A held advisory lock, released on drop
#[derive(Debug)]
pub(crate) struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Acquires store-level and per-key locks for one cache directory
pub(crate) struct LockManager {
    dir: PathBuf,
    timeout: Option<Duration>,
}

impl LockManager {
    pub fn new(root: &Path, timeout: Option<Duration>) -> Self {
        Self {
            dir: root.join(LOCKS_DIR),
            timeout,
        }
    }

    /// Create the lock directory if it does not exist yet
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Exclusive lock for one key digest
    pub fn key_lock(&self, digest: &str) -> Result<LockGuard> {
        self.acquire(
            &self.dir.join(format!("{digest}.lock")),
            LockMode::Exclusive,
        )
    }

    /// Shared store-level lock, held by point operations and prune's scan
    pub fn store_shared(&self) -> Result<LockGuard> {
        self.acquire(&self.dir.join(STORE_LOCK), LockMode::Shared)
    }

    /// Exclusive store-level lock, held while reconciling orphaned blobs
    pub fn store_exclusive(&self) -> Result<LockGuard> {
        self.acquire(&self.dir.join(STORE_LOCK), LockMode::Exclusive)
    }

    fn acquire(&self, path: &Path, mode: LockMode) -> Result<LockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        match self.timeout {
            None => {
                match mode {
                    LockMode::Shared => FileExt::lock_shared(&file)?,
                    LockMode::Exclusive => FileExt::lock_exclusive(&file)?,
                }
                Ok(LockGuard { file })
            }
            Some(timeout) => {
                let started = Instant::now();
                loop {
                    let attempt = match mode {
                        LockMode::Shared => FileExt::try_lock_shared(&file),
                        LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
                    };
                    match attempt {
                        Ok(()) => return Ok(LockGuard { file }),
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            let waited = started.elapsed();
                            if waited >= timeout {
                                return Err(CacheError::LockTimeout { waited });
                            }
                            std::thread::sleep(RETRY_INTERVAL.min(timeout - waited));
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }
}
