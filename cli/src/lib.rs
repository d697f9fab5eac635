//! # Media Archive CLI
//!
//! Resolves the configuration, sets up logging and signal handling, and
//! runs either the archive pipeline or the `list-buckets` command.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use media_archive_archiver::{
    ArchiveConfig, ArchivePipeline, BlobStore, MemoryBlobStore, S3BlobStore,
};
use media_archive_cache::{ArchiveCache, MemoryCache, SqliteCache};

pub mod cli;
pub mod settings;
pub mod signals;

pub use cli::{Cli, Command, RunArgs};

/// Install the global log subscriber, writing to stderr.
///
/// `RUST_LOG` selects the filter unless `debug` is set.
pub fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Execute the parsed command line.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.run_args() {
        Some(args) => {
            let config = settings::resolve(cli.config.as_deref(), args)?;
            archive(config, cli.endpoint_url.as_deref(), args.dry_run).await
        }
        None => list_buckets(cli.endpoint_url.as_deref()).await,
    }
}

async fn list_buckets(endpoint_url: Option<&str>) -> anyhow::Result<()> {
    let store = S3BlobStore::connect(endpoint_url).await;
    for bucket in store.list_buckets().await? {
        println!("{bucket}");
    }
    Ok(())
}

async fn archive(
    mut config: ArchiveConfig,
    endpoint_url: Option<&str>,
    dry_run: bool,
) -> anyhow::Result<()> {
    if let Some(url) = endpoint_url {
        config.endpoint_url = Some(url.to_string());
    }

    let (store, cache): (Arc<dyn BlobStore>, Arc<dyn ArchiveCache>) = if dry_run {
        info!("Dry run: nothing will be uploaded or cached");
        (
            Arc::new(MemoryBlobStore::discarding()),
            Arc::new(MemoryCache::new(config.archive_name.as_str())?),
        )
    } else {
        let store = S3BlobStore::connect(config.endpoint_url.as_deref()).await;
        store.verify_bucket(&config.bucket).await?;

        let cache_path = match &config.cache_path {
            Some(path) => path.clone(),
            None => SqliteCache::default_path()?,
        };
        let cache = SqliteCache::open(&cache_path, config.archive_name.as_str())
            .with_context(|| format!("failed to open cache {}", cache_path.display()))?;
        (Arc::new(store), Arc::new(cache))
    };

    let cancel = CancellationToken::new();
    signals::spawn_signal_listener(cancel.clone());

    let summary = ArchivePipeline::new(config, store, cache)
        .run(cancel)
        .await?;

    info!(
        "Shut down: {} uploaded ({} bytes), {} skipped, {} failed, {} errors reported",
        summary.archive.uploaded,
        summary.archive.bytes_uploaded,
        summary.archive.skipped,
        summary.archive.failed,
        summary.errors_reported
    );
    Ok(())
}
