//! # Archiver
//!
//! Uploads every file discovered under a directory tree to a blob store,
//! skipping files whose dedup key is already in the archive cache.
//!
//! ## Features
//!
//! - **Dedup Cache**: Keys are looked up before and recorded after every
//!   upload; lookups that fail are treated as misses
//! - **Per-key Locking**: At most one upload in flight per dedup key
//! - **Bounded Concurrency**: Several files processed at once
//! - **Error Sink**: Every component's errors merged and logged in one place
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        ArchivePipeline                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  RecursiveWatcher ─┐                                             │
//! │                    ├─► merge ──► Archiver ──► BlobStore           │
//! │  DirectoryScanner ─┘               │    └───► ArchiveCache        │
//! │         │                          │                             │
//! │         └──── errors ─────► merge ◄┘ ──► error sink              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod archiver;
pub mod blob;
pub mod config;
pub mod error;
pub mod key;
pub mod locks;
pub mod pipeline;
pub mod s3;
pub mod sink;

pub use archiver::{ArchiveOutcome, ArchiveReport, ArchiveStats, Archiver, ArchiverHandle};
pub use blob::{BlobStore, MemoryBlobStore, PutRequest, StorageClass, StoredObject};
pub use config::{ArchiveConfig, DEFAULT_ARCHIVE_NAME, DedupStrategy};
pub use error::{ArchiveError, PipelineError, Result};
pub use pipeline::{ArchivePipeline, PipelineSummary};
pub use s3::S3BlobStore;
pub use sink::spawn_error_sink;
