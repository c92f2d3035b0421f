//! SQLite-backed metadata index
//!
//! The authoritative table of cache entries, keyed by the normalized key
//! digest. A committed row is the publication point for an entry, so blob
//! writes always happen before the commit that references them. The database
//! file is shared by every process pointed at the cache directory; WAL mode
//! plus a busy timeout keep cross-process readers and writers out of each
//! other's way.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::Result;
use crate::types::EntryRow;

const INDEX_FILENAME: &str = "index.sqlite3";
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Transactional metadata table, one row per live entry
pub(crate) struct Index {
    path: PathBuf,
}

impl Index {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(INDEX_FILENAME),
        }
    }

    /// Open the database and create the schema on first use
    pub fn init(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                key_digest TEXT PRIMARY KEY,
                original_key BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                last_accessed_at INTEGER NOT NULL,
                ttl_ms INTEGER,
                payload_file TEXT NOT NULL,
                payload_size INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn with_immediate_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Point lookup by digest
    pub fn lookup(&self, digest: &str) -> Result<Option<EntryRow>> {
        let conn = self.connection()?;
        let row = conn
            .query_row(
                "SELECT key_digest, original_key, created_at, last_accessed_at, \
                 ttl_ms, payload_file, payload_size FROM entries WHERE key_digest = ?1",
                params![digest],
                |row| {
                    Ok(EntryRow {
                        key_digest: row.get(0)?,
                        original_key: row.get(1)?,
                        created_at: row.get(2)?,
                        last_accessed_at: row.get(3)?,
                        ttl_ms: row.get(4)?,
                        payload_file: row.get(5)?,
                        payload_size: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Insert or replace the row for a digest in one transaction
    pub fn upsert(&self, row: &EntryRow) -> Result<()> {
        self.with_immediate_tx(|tx| {
            tx.execute(
                "INSERT OR REPLACE INTO entries \
                 (key_digest, original_key, created_at, last_accessed_at, \
                  ttl_ms, payload_file, payload_size) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.key_digest,
                    row.original_key,
                    row.created_at,
                    row.last_accessed_at,
                    row.ttl_ms,
                    row.payload_file,
                    row.payload_size,
                ],
            )?;
            Ok(())
        })
    }

    /// Refresh `last_accessed_at`, replacing the stored TTL only when one is
    /// given. Returns whether a row was updated.
    pub fn touch(&self, digest: &str, now_ms: i64, new_ttl_ms: Option<i64>) -> Result<bool> {
        self.with_immediate_tx(|tx| {
            let updated = match new_ttl_ms {
                Some(ttl_ms) => tx.execute(
                    "UPDATE entries SET last_accessed_at = ?1, ttl_ms = ?2 WHERE key_digest = ?3",
                    params![now_ms, ttl_ms, digest],
                )?,
                None => tx.execute(
                    "UPDATE entries SET last_accessed_at = ?1 WHERE key_digest = ?2",
                    params![now_ms, digest],
                )?,
            };
            Ok(updated > 0)
        })
    }

    /// Delete the row for a digest; returns whether one existed
    pub fn delete(&self, digest: &str) -> Result<bool> {
        self.with_immediate_tx(|tx| {
            let deleted = tx.execute(
                "DELETE FROM entries WHERE key_digest = ?1",
                params![digest],
            )?;
            Ok(deleted > 0)
        })
    }

    /// Full scan of all rows, for `prune`
    pub fn scan(&self) -> Result<Vec<EntryRow>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT key_digest, original_key, created_at, last_accessed_at, \
             ttl_ms, payload_file, payload_size FROM entries",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(EntryRow {
                    key_digest: row.get(0)?,
                    original_key: row.get(1)?,
                    created_at: row.get(2)?,
                    last_accessed_at: row.get(3)?,
                    ttl_ms: row.get(4)?,
                    payload_file: row.get(5)?,
                    payload_size: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// The set of blob file names some row currently references
    pub fn referenced_files(&self) -> Result<HashSet<String>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT payload_file FROM entries")?;
        let files = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(files)
    }
}
