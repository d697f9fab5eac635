//! Error types for the directory watcher.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur while watching or scanning a directory tree.
///
/// Only the errors returned from installation are fatal. Everything that
/// happens afterwards is reported on the error stream and only affects the
/// subtree it names.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Directory not found.
    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    /// The root exists but is not a directory.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Invalid exclude pattern.
    #[error("invalid exclude pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// The OS refused a watch on this directory.
    #[error("failed to watch {}: {source}", path.display())]
    Registration {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// Listing a watched directory failed.
    #[error("failed to enumerate {}: {source}", path.display())]
    Enumeration {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A path named by a notification could not be inspected.
    #[error("failed to inspect {}: {source}", path.display())]
    Inspect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The native notification queue was full and notifications were
    /// dropped. The watcher enumerates the whole tree again.
    #[error("{dropped} filesystem notifications dropped; re-enumerating the tree")]
    Overflow { dropped: usize },

    /// Error raised while walking the tree during a rescan.
    #[error("scan error: {0}")]
    Scan(#[from] walkdir::Error),

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
