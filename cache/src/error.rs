//! Error types for the archive cache.

use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur in the archive cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Archive names scope the cache and cannot be empty.
    #[error("invalid archive name: {0:?}")]
    InvalidArchiveName(String),

    /// No per-user cache directory on this platform.
    #[error("no cache directory available for this user")]
    NoCacheDir,

    /// Storage engine error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored timestamp could not be decoded.
    #[error("corrupt record for {key}: {detail}")]
    CorruptRecord { key: String, detail: String },

    /// Another thread panicked while holding the connection.
    #[error("cache connection poisoned")]
    Poisoned,

    /// The blocking worker running a query was lost.
    #[error("cache task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
