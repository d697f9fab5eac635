//! Blob store abstraction and the in-memory store.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;

/// S3 storage classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageClass {
    Standard,
    ReducedRedundancy,
    #[default]
    StandardIa,
    OnezoneIa,
    IntelligentTiering,
    Glacier,
    GlacierIr,
    DeepArchive,
}

impl StorageClass {
    /// The wire name of this class.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::ReducedRedundancy => "REDUCED_REDUNDANCY",
            Self::StandardIa => "STANDARD_IA",
            Self::OnezoneIa => "ONEZONE_IA",
            Self::IntelligentTiering => "INTELLIGENT_TIERING",
            Self::Glacier => "GLACIER",
            Self::GlacierIr => "GLACIER_IR",
            Self::DeepArchive => "DEEP_ARCHIVE",
        }
    }

    const ALL: [StorageClass; 8] = [
        Self::Standard,
        Self::ReducedRedundancy,
        Self::StandardIa,
        Self::OnezoneIa,
        Self::IntelligentTiering,
        Self::Glacier,
        Self::GlacierIr,
        Self::DeepArchive,
    ];
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageClass {
    type Err = String;

    /// Accepts the wire name in any case, with `-` or `_` separators.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|class| class.as_str() == normalized)
            .ok_or_else(|| format!("unknown storage class `{s}`"))
    }
}

/// One object to store.
#[derive(Debug, Clone)]
pub struct PutRequest {
    /// Destination bucket.
    pub bucket: String,

    /// Destination object key.
    pub key: String,

    /// Object content.
    pub content: Bytes,

    /// Storage class for the object.
    pub storage_class: StorageClass,
}

/// Trait for remote object stores. Implementations must tolerate
/// concurrent callers.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Store one object, replacing any object with the same key.
    async fn put(&self, request: PutRequest) -> Result<()>;
}

/// Blob store kept in memory, for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<(String, String), StoredObject>>>,
    puts: Arc<AtomicUsize>,
    discard: bool,
}

/// An object held by [`MemoryBlobStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content: Bytes,
    pub storage_class: StorageClass,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that counts puts but keeps no content.
    pub fn discarding() -> Self {
        Self {
            discard: true,
            ..Self::default()
        }
    }

    /// Fetch a stored object.
    pub async fn get(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys stored in `bucket`, sorted.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .await
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of objects held.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Number of successful `put` calls, including overwrites.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        if self.discard { "dry-run" } else { "memory" }
    }

    async fn put(&self, request: PutRequest) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.discard {
            debug!("Dry run, not storing {}/{}", request.bucket, request.key);
            return Ok(());
        }

        self.objects.write().await.insert(
            (request.bucket, request.key),
            StoredObject {
                content: request.content,
                storage_class: request.storage_class,
            },
        );
        Ok(())
    }
}
