//! Wiring of watcher, scanner, merger, archiver and error sink.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use media_archive_async_utils::{merge, merge_receivers};
use media_archive_cache::ArchiveCache;
use media_archive_directory_watcher::{DirectoryScanner, DiscoveredFile, RecursiveWatcher};

use crate::archiver::{ArchiveStats, Archiver};
use crate::blob::BlobStore;
use crate::config::ArchiveConfig;
use crate::error::PipelineError;
use crate::sink::spawn_error_sink;

/// Totals reported when a pipeline has drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Archiver counters.
    pub archive: ArchiveStats,

    /// Errors reported by the sink.
    pub errors_reported: usize,
}

/// One archive pipeline: a watched root feeding uploads to one bucket.
pub struct ArchivePipeline {
    config: ArchiveConfig,
    store: Arc<dyn BlobStore>,
    cache: Arc<dyn ArchiveCache>,
}

impl ArchivePipeline {
    pub fn new(
        config: ArchiveConfig,
        store: Arc<dyn BlobStore>,
        cache: Arc<dyn ArchiveCache>,
    ) -> Self {
        Self {
            config,
            store,
            cache,
        }
    }

    /// Run until `cancel` fires and every stage has drained.
    ///
    /// Returns an error only if the pipeline cannot start (invalid
    /// configuration, unusable root) or a stage panics. A panicking stage
    /// stops the others, and every stage is joined before the first failure
    /// is returned. Everything else is reported through the error sink.
    pub async fn run(self, cancel: CancellationToken) -> Result<PipelineSummary, PipelineError> {
        self.config.validate()?;
        let watch_config = self.config.watch_config();
        let capacity = self.config.channel_capacity.max(1);

        match self.cache.count().await {
            Ok(count) => info!(
                "Archive {} has {count} cached keys",
                self.cache.archive()
            ),
            Err(err) => warn!("Could not count cached keys: {err}"),
        }

        // Stages stop on `cancel`, or on their own when a sibling fails.
        let stages = cancel.child_token();

        let watcher = RecursiveWatcher::install(watch_config.clone(), stages.clone()).await?;
        let mut file_sources: Vec<mpsc::Receiver<DiscoveredFile>> = vec![watcher.files];
        let mut error_sources: Vec<BoxStream<'static, PipelineError>> =
            vec![errors_of(watcher.errors)];
        let mut discovery_tasks = vec![watcher.task];

        if watch_config.needs_scanner() {
            let scanner = match DirectoryScanner::new(watch_config)
                .spawn(stages.clone())
                .await
            {
                Ok(scanner) => scanner,
                Err(err) => {
                    stages.cancel();
                    for task in discovery_tasks {
                        if let Err(join_err) = task.await {
                            warn!("Watcher task failed during shutdown: {join_err}");
                        }
                    }
                    return Err(err.into());
                }
            };
            file_sources.push(scanner.files);
            error_sources.push(errors_of(scanner.errors));
            discovery_tasks.push(scanner.task);
        }

        let files = merge_receivers(file_sources, capacity, stages.clone());
        let archiver = Arc::new(Archiver::new(self.config, self.store, self.cache));
        let archiver = archiver.spawn(files, stages.clone());
        error_sources.push(errors_of(archiver.errors));

        let errors = merge(error_sources, capacity, stages.clone());
        let sink = spawn_error_sink(errors);

        join_stages(discovery_tasks, archiver.task, sink, stages).await
    }
}

/// Wait for every stage, cancelling `stages` as soon as one fails so the
/// rest drain. The first failure is returned once all of them are joined.
async fn join_stages(
    discovery: Vec<JoinHandle<()>>,
    archiver: JoinHandle<ArchiveStats>,
    sink: JoinHandle<usize>,
    stages: CancellationToken,
) -> Result<PipelineSummary, PipelineError> {
    let mut failure = None;

    for task in discovery {
        if let Err(err) = task.await {
            stage_failed(&stages, &mut failure, "discovery", err);
        }
    }
    let archive = match archiver.await {
        Ok(stats) => stats,
        Err(err) => {
            stage_failed(&stages, &mut failure, "archiver", err);
            ArchiveStats::default()
        }
    };
    let errors_reported = match sink.await {
        Ok(count) => count,
        Err(err) => {
            stage_failed(&stages, &mut failure, "error sink", err);
            0
        }
    };

    match failure {
        Some(err) => Err(err),
        None => Ok(PipelineSummary {
            archive,
            errors_reported,
        }),
    }
}

fn stage_failed(
    stages: &CancellationToken,
    failure: &mut Option<PipelineError>,
    stage: &str,
    err: JoinError,
) {
    error!("Pipeline {stage} task failed: {err}");
    stages.cancel();
    if failure.is_none() {
        *failure = Some(PipelineError::Task(err));
    }
}

fn errors_of<E>(errors: mpsc::Receiver<E>) -> BoxStream<'static, PipelineError>
where
    E: Send + 'static,
    PipelineError: From<E>,
{
    ReceiverStream::new(errors).map(PipelineError::from).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_join_stages_collects_totals() {
        let stages = CancellationToken::new();
        let stats = ArchiveStats {
            uploaded: 2,
            ..ArchiveStats::default()
        };

        let summary = join_stages(
            vec![tokio::spawn(async {})],
            tokio::spawn(async move { stats }),
            tokio::spawn(async { 3 }),
            stages.clone(),
        )
        .await
        .unwrap();

        assert_eq!(
            summary,
            PipelineSummary {
                archive: stats,
                errors_reported: 3,
            }
        );
        assert!(!stages.is_cancelled());
    }

    #[tokio::test]
    async fn test_failed_stage_stops_and_joins_the_rest() {
        let stages = CancellationToken::new();
        let sink_finished = Arc::new(AtomicBool::new(false));

        let discovery: JoinHandle<()> = tokio::spawn(async { panic!("discovery stage crashed") });
        let archiver = {
            let stages = stages.clone();
            tokio::spawn(async move {
                stages.cancelled().await;
                ArchiveStats::default()
            })
        };
        let sink = {
            let stages = stages.clone();
            let sink_finished = Arc::clone(&sink_finished);
            tokio::spawn(async move {
                stages.cancelled().await;
                sink_finished.store(true, Ordering::SeqCst);
                0
            })
        };

        let result = join_stages(vec![discovery], archiver, sink, stages.clone()).await;

        assert!(matches!(result, Err(PipelineError::Task(_))));
        assert!(stages.is_cancelled());
        assert!(sink_finished.load(Ordering::SeqCst));
    }
}
