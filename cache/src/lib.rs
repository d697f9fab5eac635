//! # Archive Cache
//!
//! Records which dedup keys have already been uploaded, one namespace per
//! archive. The archiver reads the cache before every upload and writes it
//! after every successful one.
//!
//! `set` is idempotent in every implementation: recording a key twice is
//! not an error and keeps a single record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod error;
pub mod memory;
pub mod sqlite;

pub use error::{CacheError, Result};
pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

/// A key that has been archived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// The dedup key.
    pub key: String,

    /// When the upload for this key completed.
    pub archived_at: DateTime<Utc>,
}

impl CacheRecord {
    /// Create a record stamped with the current time.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            archived_at: Utc::now(),
        }
    }
}

/// Trait for dedup cache stores. Implementations must tolerate concurrent
/// callers.
#[async_trait]
pub trait ArchiveCache: Send + Sync {
    /// The archive this cache is scoped to.
    fn archive(&self) -> &str;

    /// Record `key` as archived. Recording an existing key is a no-op.
    async fn set(&self, key: &str) -> Result<()>;

    /// Look up `key`.
    async fn get(&self, key: &str) -> Result<Option<CacheRecord>>;

    /// Forget `key`, making it eligible for upload again.
    async fn purge(&self, key: &str) -> Result<()>;

    /// Number of records in this archive.
    async fn count(&self) -> Result<usize>;
}

pub(crate) fn validate_archive_name(archive: String) -> Result<String> {
    if archive.trim().is_empty() {
        return Err(CacheError::InvalidArchiveName(archive));
    }
    Ok(archive)
}
