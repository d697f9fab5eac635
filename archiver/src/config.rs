//! Configuration for the archive pipeline.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use media_archive_directory_watcher::WatchConfig;
use media_archive_directory_watcher::config::DEFAULT_EVENT_BUFFER;

use crate::blob::StorageClass;
use crate::error::{ArchiveError, Result};

/// Default archive name, also the default key prefix in the bucket.
pub const DEFAULT_ARCHIVE_NAME: &str = "media-archive";

/// Configuration for one archive: what to watch, where to upload it and
/// how to deduplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ArchiveConfig {
    /// Directory to watch.
    pub root_dir: PathBuf,

    /// Logical archive name; scopes the cache and prefixes object keys.
    pub archive_name: String,

    /// Destination bucket.
    #[serde(alias = "aws-bucket")]
    pub bucket: String,

    /// Storage class for uploaded objects.
    pub storage_class: StorageClass,

    /// How files are identified in the cache.
    pub dedup: DedupStrategy,

    /// Maximum number of files processed at once.
    pub upload_concurrency: usize,

    /// Capacity of the channels between pipeline stages.
    pub channel_capacity: usize,

    /// Cache database path (None = per-user cache directory).
    pub cache_path: Option<PathBuf>,

    /// Endpoint override for S3-compatible stores.
    pub endpoint_url: Option<String>,

    /// Patterns to exclude (None = watcher defaults).
    pub exclude_patterns: Option<Vec<String>>,

    /// Whether symbolic links to files are archived.
    pub follow_symlinks: bool,

    /// Maximum depth to recurse (None = unlimited).
    pub max_depth: Option<usize>,

    /// Run a full scan at startup.
    pub initial_scan: bool,

    /// Interval for periodic rescans (in seconds).
    pub rescan_interval_secs: Option<u64>,
}

impl ArchiveConfig {
    /// Create a new configuration with default values.
    pub fn new(root_dir: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    /// Set the archive name.
    pub fn with_archive_name(mut self, name: impl Into<String>) -> Self {
        self.archive_name = name.into();
        self
    }

    /// Set the dedup strategy.
    pub fn with_dedup(mut self, dedup: DedupStrategy) -> Self {
        self.dedup = dedup;
        self
    }

    /// Set the storage class.
    pub fn with_storage_class(mut self, storage_class: StorageClass) -> Self {
        self.storage_class = storage_class;
        self
    }

    /// Set the upload concurrency.
    pub fn with_upload_concurrency(mut self, concurrency: usize) -> Self {
        self.upload_concurrency = concurrency;
        self
    }

    /// Archive name with surrounding slashes removed, as used in keys.
    pub fn key_prefix(&self) -> &str {
        self.archive_name.trim_matches('/')
    }

    /// Check the options the pipeline cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix().trim().is_empty() {
            return Err(ArchiveError::Config("archive name must not be empty".into()));
        }
        if self.bucket.trim().is_empty() {
            return Err(ArchiveError::Config("bucket must be set".into()));
        }
        if self.upload_concurrency == 0 {
            return Err(ArchiveError::Config(
                "upload concurrency must be at least 1".into(),
            ));
        }
        if self.max_depth == Some(0) {
            return Err(ArchiveError::Config(
                "max depth must be at least 1 (files directly under the root)".into(),
            ));
        }
        if self.rescan_interval_secs == Some(0) {
            return Err(ArchiveError::Config(
                "rescan interval must be at least one second".into(),
            ));
        }
        Ok(())
    }

    /// The watcher and scanner settings for this archive.
    pub fn watch_config(&self) -> WatchConfig {
        let mut watch = WatchConfig::new(&self.root_dir).with_event_buffer(self.channel_capacity);
        if let Some(patterns) = &self.exclude_patterns {
            watch.exclude_patterns = patterns.clone();
        }
        watch.follow_symlinks = self.follow_symlinks;
        watch.max_depth = self.max_depth;
        watch.initial_scan = self.initial_scan;
        watch.rescan_interval_secs = self.rescan_interval_secs;
        watch
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
            bucket: String::new(),
            storage_class: StorageClass::default(),
            dedup: DedupStrategy::default(),
            upload_concurrency: 4,
            channel_capacity: DEFAULT_EVENT_BUFFER,
            cache_path: None,
            endpoint_url: None,
            exclude_patterns: None,
            follow_symlinks: false,
            max_depth: None,
            initial_scan: false,
            rescan_interval_secs: None,
        }
    }
}

/// How a file's dedup key is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupStrategy {
    /// The path relative to the root. Cheap, but a file overwritten with
    /// new content is not uploaded again.
    RelativePath,

    /// SHA-256 of the content. Changed files are uploaded again and
    /// identical copies are skipped, at the cost of hashing every file.
    #[default]
    ContentHash,
}

impl DedupStrategy {
    /// Name used in configuration and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RelativePath => "relative-path",
            Self::ContentHash => "content-hash",
        }
    }
}

impl FromStr for DedupStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "relative-path" | "path" => Ok(Self::RelativePath),
            "content-hash" | "hash" => Ok(Self::ContentHash),
            other => Err(format!(
                "unknown dedup strategy `{other}` (expected `relative-path` or `content-hash`)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ArchiveConfig::default();
        assert_eq!(config.root_dir, PathBuf::from("."));
        assert_eq!(config.archive_name, "media-archive");
        assert_eq!(config.storage_class, StorageClass::StandardIa);
        assert_eq!(config.dedup, DedupStrategy::ContentHash);
    }

    #[test]
    fn test_validate() {
        assert!(ArchiveConfig::default().validate().is_err());
        assert!(ArchiveConfig::new("/photos", "bucket").validate().is_ok());
        assert!(
            ArchiveConfig::new("/photos", "bucket")
                .with_archive_name("//")
                .validate()
                .is_err()
        );
        assert!(
            ArchiveConfig::new("/photos", "bucket")
                .with_upload_concurrency(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_validate_rejects_zero_depth_and_interval() {
        let mut config = ArchiveConfig::new("/photos", "bucket");
        config.max_depth = Some(0);
        assert!(config.validate().is_err());
        config.max_depth = Some(1);
        assert!(config.validate().is_ok());

        config.rescan_interval_secs = Some(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rescan interval"));
        config.rescan_interval_secs = Some(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_watch_config_carries_settings() {
        let mut config = ArchiveConfig::new("/photos", "bucket");
        config.max_depth = Some(2);
        config.rescan_interval_secs = Some(60);
        config.exclude_patterns = Some(vec!["*.xmp".to_string()]);

        let watch = config.watch_config();
        assert_eq!(watch.root, PathBuf::from("/photos"));
        assert_eq!(watch.max_depth, Some(2));
        assert_eq!(watch.exclude_patterns, vec!["*.xmp".to_string()]);
        assert!(watch.needs_scanner());
    }

    #[test]
    fn test_dedup_strategy_parsing() {
        assert_eq!("path".parse(), Ok(DedupStrategy::RelativePath));
        assert_eq!("content-hash".parse(), Ok(DedupStrategy::ContentHash));
        assert!("md5".parse::<DedupStrategy>().is_err());
    }
}
