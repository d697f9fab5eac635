//! The archiver: turns discovered files into uploads, at most once per key.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use media_archive_cache::ArchiveCache;
use media_archive_directory_watcher::DiscoveredFile;

use crate::blob::{BlobStore, PutRequest};
use crate::config::{ArchiveConfig, DedupStrategy};
use crate::error::ArchiveError;
use crate::key::{content_hash, destination_key, path_key};
use crate::locks::KeyLocks;

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// The file was uploaded and recorded in the cache.
    Uploaded {
        key: String,
        destination: String,
        bytes: u64,
    },

    /// The key was already cached; nothing was uploaded.
    Skipped { key: String },
}

/// Result of archiving one file.
///
/// `outcome` is `None` when the file could not be archived; `errors` may be
/// non-empty even when it succeeded (a failed cache lookup or insert).
#[derive(Debug, Default)]
pub struct ArchiveReport {
    pub outcome: Option<ArchiveOutcome>,
    pub errors: Vec<ArchiveError>,
}

impl ArchiveReport {
    fn failed(error: ArchiveError) -> Self {
        Self {
            outcome: None,
            errors: vec![error],
        }
    }
}

/// Counters over the archiver's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveStats {
    /// Files uploaded.
    pub uploaded: usize,

    /// Files skipped because their key was cached.
    pub skipped: usize,

    /// Files that could not be read or uploaded.
    pub failed: usize,

    /// Total bytes uploaded.
    pub bytes_uploaded: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    uploaded: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    bytes_uploaded: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> ArchiveStats {
        ArchiveStats {
            uploaded: self.uploaded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
        }
    }
}

/// Output of [`Archiver::spawn`].
#[derive(Debug)]
pub struct ArchiverHandle {
    /// Per-file errors. Closes when the task ends.
    pub errors: mpsc::Receiver<ArchiveError>,

    /// The archiver task; resolves to the final counters.
    pub task: JoinHandle<ArchiveStats>,
}

/// Uploads discovered files to a blob store, guarded by the dedup cache.
pub struct Archiver {
    config: ArchiveConfig,
    store: Arc<dyn BlobStore>,
    cache: Arc<dyn ArchiveCache>,
    locks: KeyLocks,
    stats: StatsCounters,
}

impl Archiver {
    /// Create an archiver for `config`, uploading to `store`.
    pub fn new(
        config: ArchiveConfig,
        store: Arc<dyn BlobStore>,
        cache: Arc<dyn ArchiveCache>,
    ) -> Self {
        Self {
            config,
            store,
            cache,
            locks: KeyLocks::new(),
            stats: StatsCounters::default(),
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> ArchiveStats {
        self.stats.snapshot()
    }

    /// Archive one file.
    ///
    /// Holds the lock for the file's dedup key from the cache lookup until
    /// the cache insert, so concurrent discoveries of the same content
    /// upload once.
    pub async fn archive(&self, file: &DiscoveredFile) -> ArchiveReport {
        let mut content = None;
        let key = match self.config.dedup {
            DedupStrategy::RelativePath => path_key(file),
            DedupStrategy::ContentHash => match read(file).await {
                Ok(bytes) => {
                    let key = content_hash(&bytes);
                    content = Some(bytes);
                    key
                }
                Err(err) => return self.fail(err),
            },
        };

        let _guard = self.locks.acquire(&key).await;
        let mut report = ArchiveReport::default();

        match self.cache.get(&key).await {
            Ok(Some(record)) => {
                debug!(
                    "Skipping {}: archived at {}",
                    file.relative_path.display(),
                    record.archived_at
                );
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                report.outcome = Some(ArchiveOutcome::Skipped { key });
                return report;
            }
            Ok(None) => {}
            Err(source) => {
                warn!("Cache lookup failed for {key}, uploading anyway: {source}");
                report.errors.push(ArchiveError::Cache {
                    key: key.clone(),
                    source,
                });
            }
        }

        let content = match content {
            Some(content) => content,
            None => match read(file).await {
                Ok(content) => content,
                Err(err) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    report.errors.push(err);
                    return report;
                }
            },
        };

        let destination = destination_key(&self.config.archive_name, file);
        let bytes = content.len() as u64;
        let request = PutRequest {
            bucket: self.config.bucket.clone(),
            key: destination.clone(),
            content,
            storage_class: self.config.storage_class,
        };

        if let Err(err) = self.store.put(request).await {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            report.errors.push(err);
            return report;
        }
        self.stats.uploaded.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
        info!(
            "Archived {} to {}/{destination} ({bytes} bytes)",
            file.relative_path.display(),
            self.config.bucket
        );

        if let Err(source) = self.cache.set(&key).await {
            report.errors.push(ArchiveError::Cache {
                key: key.clone(),
                source,
            });
        }

        report.outcome = Some(ArchiveOutcome::Uploaded {
            key,
            destination,
            bytes,
        });
        report
    }

    fn fail(&self, error: ArchiveError) -> ArchiveReport {
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        ArchiveReport::failed(error)
    }

    /// Archive every file received on `files` until it closes or `cancel`
    /// fires, up to `upload_concurrency` at a time.
    ///
    /// Files already being processed when `cancel` fires are finished.
    pub fn spawn(
        self: Arc<Self>,
        files: mpsc::Receiver<DiscoveredFile>,
        cancel: CancellationToken,
    ) -> ArchiverHandle {
        let (errors_tx, errors_rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let concurrency = self.config.upload_concurrency.max(1);

        let task = tokio::spawn(async move {
            info!(
                "Archiving to {} bucket {} as {} ({concurrency} at a time)",
                self.store.name(),
                self.config.bucket,
                self.config.archive_name
            );

            ReceiverStream::new(files)
                .take_until(cancel.clone().cancelled_owned())
                .for_each_concurrent(concurrency, |file| {
                    let archiver = Arc::clone(&self);
                    let errors_tx = errors_tx.clone();
                    let cancel = cancel.clone();
                    async move {
                        let report = archiver.archive(&file).await;
                        for error in report.errors {
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                sent = errors_tx.send(error) => {
                                    if sent.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                })
                .await;

            let stats = self.stats();
            info!(
                "Archiver stopped: {} uploaded, {} skipped, {} failed",
                stats.uploaded, stats.skipped, stats.failed
            );
            stats
        });

        ArchiverHandle {
            errors: errors_rx,
            task,
        }
    }
}

async fn read(file: &DiscoveredFile) -> Result<Bytes, ArchiveError> {
    tokio::fs::read(&file.absolute_path)
        .await
        .map(Bytes::from)
        .map_err(|source| ArchiveError::FileRead {
            path: file.absolute_path.clone(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use async_trait::async_trait;
    use media_archive_cache::{CacheError, CacheRecord, MemoryCache};
    use media_archive_directory_watcher::DiscoveryOrigin;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use tempfile::TempDir;

    const BUCKET: &str = "bucket";

    struct Fixture {
        temp_dir: TempDir,
        store: MemoryBlobStore,
        cache: MemoryCache,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                temp_dir: TempDir::new().unwrap(),
                store: MemoryBlobStore::new(),
                cache: MemoryCache::new("photos").unwrap(),
            }
        }

        fn write(&self, relative: &str, content: &str) -> DiscoveredFile {
            let path = self.temp_dir.path().join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, content).unwrap();
            discovered(self.temp_dir.path(), relative)
        }

        fn archiver(&self, dedup: DedupStrategy) -> Archiver {
            let config = ArchiveConfig::new(self.temp_dir.path(), BUCKET)
                .with_archive_name("photos")
                .with_dedup(dedup);
            Archiver::new(
                config,
                Arc::new(self.store.clone()),
                Arc::new(self.cache.clone()),
            )
        }
    }

    fn discovered(root: &Path, relative: &str) -> DiscoveredFile {
        DiscoveredFile::new(root, root.join(relative), DiscoveryOrigin::Notification).unwrap()
    }

    /// Rejects every object whose key contains "bad".
    struct FailingStore {
        inner: MemoryBlobStore,
    }

    #[async_trait]
    impl BlobStore for FailingStore {
        fn name(&self) -> &str {
            "failing"
        }

        async fn put(&self, request: PutRequest) -> crate::error::Result<()> {
            if request.key.contains("bad") {
                return Err(ArchiveError::Upload {
                    key: request.key,
                    message: "access denied".to_string(),
                });
            }
            self.inner.put(request).await
        }
    }

    /// A cache whose lookups always fail.
    struct BrokenCache {
        inner: MemoryCache,
    }

    #[async_trait]
    impl ArchiveCache for BrokenCache {
        fn archive(&self) -> &str {
            self.inner.archive()
        }

        async fn set(&self, key: &str) -> media_archive_cache::Result<()> {
            self.inner.set(key).await
        }

        async fn get(&self, _key: &str) -> media_archive_cache::Result<Option<CacheRecord>> {
            Err(CacheError::Poisoned)
        }

        async fn purge(&self, key: &str) -> media_archive_cache::Result<()> {
            self.inner.purge(key).await
        }

        async fn count(&self) -> media_archive_cache::Result<usize> {
            self.inner.count().await
        }
    }

    #[tokio::test]
    async fn test_upload_records_key() {
        let fixture = Fixture::new();
        let file = fixture.write("2019/beach.jpg", "sand");
        let archiver = fixture.archiver(DedupStrategy::RelativePath);

        let report = archiver.archive(&file).await;
        assert!(report.errors.is_empty());
        assert_eq!(
            report.outcome,
            Some(ArchiveOutcome::Uploaded {
                key: "2019/beach.jpg".to_string(),
                destination: "photos/2019/beach.jpg".to_string(),
                bytes: 4,
            })
        );

        let object = fixture.store.get(BUCKET, "photos/2019/beach.jpg").await.unwrap();
        assert_eq!(object.content, Bytes::from_static(b"sand"));
        assert!(fixture.cache.get("2019/beach.jpg").await.unwrap().is_some());
        assert_eq!(fixture.cache.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cached_key_is_not_uploaded() {
        let fixture = Fixture::new();
        let file = fixture.write("a.jpg", "a");
        fixture.cache.set("a.jpg").await.unwrap();

        let archiver = fixture.archiver(DedupStrategy::RelativePath);
        let report = archiver.archive(&file).await;

        assert_eq!(
            report.outcome,
            Some(ArchiveOutcome::Skipped {
                key: "a.jpg".to_string()
            })
        );
        assert_eq!(fixture.store.put_count(), 0);
        assert_eq!(fixture.cache.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_second_discovery_is_skipped() {
        let fixture = Fixture::new();
        let file = fixture.write("a.jpg", "a");
        let archiver = fixture.archiver(DedupStrategy::ContentHash);

        archiver.archive(&file).await;
        archiver.archive(&file).await;

        assert_eq!(fixture.store.put_count(), 1);
        assert_eq!(
            archiver.stats(),
            ArchiveStats {
                uploaded: 1,
                skipped: 1,
                failed: 0,
                bytes_uploaded: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_upload_once() {
        let fixture = Fixture::new();
        let file = fixture.write("burst.mov", "frames");
        let archiver = Arc::new(fixture.archiver(DedupStrategy::ContentHash));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let archiver = Arc::clone(&archiver);
            let file = file.clone();
            handles.push(tokio::spawn(async move { archiver.archive(&file).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().outcome.is_some());
        }

        assert_eq!(fixture.store.put_count(), 1);
        assert_eq!(archiver.stats().skipped, 7);
    }

    #[tokio::test]
    async fn test_content_hash_dedup() {
        let fixture = Fixture::new();
        let archiver = fixture.archiver(DedupStrategy::ContentHash);

        let original = fixture.write("a.jpg", "pixels");
        let copy = fixture.write("copy/a.jpg", "pixels");
        archiver.archive(&original).await;
        let report = archiver.archive(&copy).await;
        assert!(matches!(
            report.outcome,
            Some(ArchiveOutcome::Skipped { .. })
        ));

        let edited = fixture.write("a.jpg", "edited pixels");
        let report = archiver.archive(&edited).await;
        assert!(matches!(
            report.outcome,
            Some(ArchiveOutcome::Uploaded { .. })
        ));
        assert_eq!(fixture.store.put_count(), 2);
    }

    #[tokio::test]
    async fn test_relative_path_dedup_ignores_content() {
        let fixture = Fixture::new();
        let archiver = fixture.archiver(DedupStrategy::RelativePath);

        archiver.archive(&fixture.write("a.jpg", "one")).await;
        archiver.archive(&fixture.write("a.jpg", "two")).await;

        assert_eq!(fixture.store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_reported() {
        let fixture = Fixture::new();
        let file = discovered(fixture.temp_dir.path(), "vanished.jpg");

        for dedup in [DedupStrategy::RelativePath, DedupStrategy::ContentHash] {
            let report = fixture.archiver(dedup).archive(&file).await;
            assert!(report.outcome.is_none());
            assert!(matches!(
                report.errors.as_slice(),
                [ArchiveError::FileRead { .. }]
            ));
        }
        assert_eq!(fixture.cache.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cache_lookup_failure_fails_open() {
        let fixture = Fixture::new();
        let file = fixture.write("a.jpg", "a");
        let config = ArchiveConfig::new(fixture.temp_dir.path(), BUCKET);
        let cache = Arc::new(BrokenCache {
            inner: fixture.cache.clone(),
        });
        let archiver = Archiver::new(config, Arc::new(fixture.store.clone()), cache);

        let report = archiver.archive(&file).await;
        assert!(matches!(
            report.outcome,
            Some(ArchiveOutcome::Uploaded { .. })
        ));
        assert!(matches!(
            report.errors.as_slice(),
            [ArchiveError::Cache { .. }]
        ));
        assert_eq!(fixture.cache.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upload_failure_leaves_cache_untouched() {
        let fixture = Fixture::new();
        let config = ArchiveConfig::new(fixture.temp_dir.path(), BUCKET)
            .with_dedup(DedupStrategy::RelativePath);
        let store = Arc::new(FailingStore {
            inner: fixture.store.clone(),
        });
        let archiver = Arc::new(Archiver::new(
            config,
            store,
            Arc::new(fixture.cache.clone()),
        ));

        let (files_tx, files_rx) = mpsc::channel(8);
        files_tx.send(fixture.write("bad.jpg", "x")).await.unwrap();
        files_tx.send(fixture.write("good.jpg", "y")).await.unwrap();
        drop(files_tx);

        let mut handle = archiver.spawn(files_rx, CancellationToken::new());
        let stats = handle.task.await.unwrap();

        assert_eq!(stats.uploaded, 1);
        assert_eq!(stats.failed, 1);
        assert!(matches!(
            handle.errors.recv().await,
            Some(ArchiveError::Upload { .. })
        ));
        assert!(handle.errors.recv().await.is_none());

        assert!(fixture.cache.get("bad.jpg").await.unwrap().is_none());
        assert!(fixture.cache.get("good.jpg").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_spawn_stops_on_cancel() {
        let fixture = Fixture::new();
        let archiver = Arc::new(fixture.archiver(DedupStrategy::ContentHash));
        let cancel = CancellationToken::new();

        let (_files_tx, files_rx) = mpsc::channel::<DiscoveredFile>(8);
        let handle = archiver.spawn(files_rx, cancel.clone());
        cancel.cancel();

        let stats = tokio::time::timeout(std::time::Duration::from_secs(5), handle.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats, ArchiveStats::default());
    }
}
