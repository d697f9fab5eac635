//! # Directory Watcher
//!
//! This crate discovers the files under a directory tree, both those that
//! exist when watching starts and those created or modified afterwards.
//!
//! ## Features
//!
//! - **Recursive Watching**: One native watch per directory, extended as
//!   new directories appear
//! - **Race-free Installation**: Every directory is watched before it is
//!   listed, so nothing created in between is missed
//! - **Rescans**: Optional full walks at startup and on a schedule
//! - **Exclusion Patterns**: Filter out unwanted files
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Directory Watcher                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  WatchConfig ──► RecursiveWatcher ──► DiscoveredFile           │
//! │       │                │                    │                   │
//! │       ▼                ▼                    ▼                   │
//! │  ExcludeSet     DirectoryScanner      WatcherError             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Discovery is at-least-once: the same file may be reported by the
//! installation listing, by a notification and by a rescan. Consumers
//! deduplicate.

pub mod config;
pub mod error;
pub mod event;
pub mod scanner;
pub mod watcher;

pub use config::{ExcludeSet, WatchConfig};
pub use error::{Result, WatcherError};
pub use event::{ChangeKind, DiscoveredFile, DiscoveryOrigin};
pub use scanner::DirectoryScanner;
pub use watcher::{DiscoveryStreams, RecursiveWatcher};
