//! Error types for the archiver.

use std::path::PathBuf;

use thiserror::Error;

use media_archive_cache::CacheError;
use media_archive_directory_watcher::WatcherError;

/// Result type alias for archiver operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors that can occur while archiving a single file.
///
/// None of these stop the pipeline; the file is skipped and stays eligible
/// for a later attempt.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The blob store rejected the upload.
    #[error("failed to upload {key}: {message}")]
    Upload { key: String, message: String },

    /// A cache lookup or insert failed.
    #[error("cache error for {key}: {source}")]
    Cache {
        key: String,
        #[source]
        source: CacheError,
    },

    /// Blob store session or bucket error.
    #[error("blob store error: {0}")]
    BlobStore(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Any error produced by the pipeline, as seen by the error sink.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Directory watcher or scanner error.
    #[error("watcher error: {0}")]
    Watcher(#[from] WatcherError),

    /// Archiver error.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// A pipeline task panicked or was aborted.
    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
