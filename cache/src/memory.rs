//! In-memory cache, for tests and dry runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::{ArchiveCache, CacheRecord, validate_archive_name};

/// Cache kept in a hash map; lost when the process exits.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    archive: String,
    records: Arc<RwLock<HashMap<String, CacheRecord>>>,
}

impl MemoryCache {
    /// Create an empty cache for `archive`.
    pub fn new(archive: impl Into<String>) -> Result<Self> {
        Ok(Self {
            archive: validate_archive_name(archive.into())?,
            records: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}

#[async_trait]
impl ArchiveCache for MemoryCache {
    fn archive(&self) -> &str {
        &self.archive
    }

    async fn set(&self, key: &str) -> Result<()> {
        let mut records = self.records.write().await;
        // Keep the first record so `archived_at` reflects the first upload.
        records
            .entry(key.to_string())
            .or_insert_with(|| CacheRecord::new(key));
        debug!("Cached key {key} in archive {}", self.archive);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn purge(&self, key: &str) -> Result<()> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_set_get() {
        let cache = MemoryCache::new("photos").unwrap();
        cache.set("2019/beach.jpg").await.unwrap();

        let record = cache.get("2019/beach.jpg").await.unwrap().unwrap();
        assert_eq!(record.key, "2019/beach.jpg");
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let cache = MemoryCache::new("photos").unwrap();
        assert!(cache.get("not cached").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_is_idempotent() {
        let cache = MemoryCache::new("photos").unwrap();
        cache.set("a").await.unwrap();
        let first = cache.get("a").await.unwrap().unwrap();
        cache.set("a").await.unwrap();

        assert_eq!(cache.count().await.unwrap(), 1);
        assert_eq!(cache.get("a").await.unwrap().unwrap(), first);
    }

    #[tokio::test]
    async fn test_purge() {
        let cache = MemoryCache::new("photos").unwrap();
        cache.set("a").await.unwrap();
        cache.purge("a").await.unwrap();
        cache.purge("never-set").await.unwrap();

        assert!(cache.get("a").await.unwrap().is_none());
    }

    #[test]
    fn test_empty_archive_name() {
        assert!(MemoryCache::new("  ").is_err());
    }
}
