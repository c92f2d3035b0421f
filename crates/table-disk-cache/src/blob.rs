//! Atomic blob file storage
//!
//! Payload bytes live under `blobs/`. Writes land in `tmp/` first (same
//! volume), are flushed, then renamed into place, so any file visible under
//! `blobs/` is complete. Readers never observe a partial payload.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

const BLOBS_DIR: &str = "blobs";
const TMP_DIR: &str = "tmp";
const PARTIAL_SUFFIX: &str = ".partial";

/// File storage for serialized payloads
pub(crate) struct BlobStore {
    blobs: PathBuf,
    tmp: PathBuf,
}

impl BlobStore {
    pub fn new(root: &Path) -> Self {
        Self {
            blobs: root.join(BLOBS_DIR),
            tmp: root.join(TMP_DIR),
        }
    }

    /// Create the storage directories if they do not exist yet
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.blobs)?;
        fs::create_dir_all(&self.tmp)?;
        Ok(())
    }

    /// Write payload bytes to `file_name`, atomically.
    ///
    /// The bytes land in a temporary file first and are flushed to disk
    /// before the rename publishes them.
    pub fn write(&self, file_name: &str, bytes: &[u8]) -> Result<()> {
        let tmp = self.tmp.join(format!("{file_name}{PARTIAL_SUFFIX}"));
        let dest = self.blobs.join(file_name);

        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fsync_dir(&self.tmp).ok();

        fs::rename(&tmp, &dest)?;
        fsync_dir(&self.blobs).ok();

        debug!(file = %file_name, size = bytes.len(), "blob written");
        Ok(())
    }

    /// Read a payload; `None` when the blob is absent
    pub fn read(&self, file_name: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.blobs.join(file_name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a blob is present without reading it
    pub fn exists(&self, file_name: &str) -> bool {
        self.blobs.join(file_name).is_file()
    }

    /// Remove a blob; removing an absent blob is not an error
    pub fn remove(&self, file_name: &str) -> Result<()> {
        match fs::remove_file(self.blobs.join(file_name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Enumerate blob file names, for orphan reconciliation
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.blobs)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Delete leftover `.partial` files from interrupted writes
    pub fn sweep_partials(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.tmp)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && entry.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX)
            {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "swept partial blob files");
        }
        Ok(removed)
    }
}

fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}
