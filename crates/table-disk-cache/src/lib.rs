//! Disk-backed TTL cache for serialized tabular payloads
//!
//! Stores large serialized objects on disk under arbitrary serde-encodable
//! keys, with per-entry sliding TTL expiration. Entry metadata lives in an
//! embedded SQLite index; payloads are written as blob files with atomic
//! rename semantics. File locks make the cache safe to share between threads
//! and between processes pointed at the same directory.
//!
//! ```no_run
//! use std::time::Duration;
//! use table_disk_cache::{DiskCache, JsonCodec};
//!
//! # fn main() -> table_disk_cache::Result<()> {
//! let cache = DiskCache::new("/tmp/my-cache", JsonCodec::<Vec<(String, u32)>>::new())?;
//! let table = vec![("alpha".to_string(), 3u32)];
//! cache.set("dataset", &table, Some(Duration::from_secs(60)))?;
//! assert_eq!(cache.get("dataset")?, Some(table));
//! # Ok(())
//! # }
//! ```

mod blob;
mod cache;
mod codec;
mod error;
mod index;
mod key;
mod lock;
mod types;

pub use cache::DiskCache;
pub use codec::{JsonCodec, PayloadCodec};
pub use error::{CacheError, CodecError, Result};
pub use types::{CacheConfig, EntryInfo};
