//! Configuration types for directory watching.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatcherError};

/// Default capacity of the channels between the watcher and its consumers.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Default capacity of the queue between notify's thread and the watcher.
pub const DEFAULT_NATIVE_BUFFER: usize = 16 * 1024;

/// Configuration for a watched directory tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Root of the tree to watch.
    pub root: PathBuf,

    /// Patterns to exclude (glob patterns).
    ///
    /// A pattern without a `/` is matched against every component of the
    /// path relative to the root, so `.git` prunes the whole repository and
    /// `*.tmp` drops temporary files anywhere. A pattern containing `/` is
    /// matched against the whole relative path.
    pub exclude_patterns: Vec<String>,

    /// Whether symbolic links to files are discovered. Symlinked
    /// directories are never descended into.
    pub follow_symlinks: bool,

    /// Maximum depth to recurse (None = unlimited). Files directly under
    /// the root are at depth 1, so `Some(0)` discovers nothing.
    pub max_depth: Option<usize>,

    /// Capacity of the output channels.
    pub event_buffer: usize,

    /// Capacity of the native notification queue. Notifications arriving
    /// while it is full are dropped and the tree is enumerated again.
    pub native_buffer: usize,

    /// Run a full scan when the pipeline starts, alongside the watcher's
    /// own enumeration.
    pub initial_scan: bool,

    /// Interval for periodic rescans (in seconds).
    pub rescan_interval_secs: Option<u64>,
}

impl WatchConfig {
    /// Create a new watch config.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude_patterns: Self::default_excludes(),
            follow_symlinks: false,
            max_depth: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
            native_buffer: DEFAULT_NATIVE_BUFFER,
            initial_scan: false,
            rescan_interval_secs: None,
        }
    }

    /// Add an exclude pattern.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    /// Drop all exclude patterns, including the defaults.
    pub fn without_excludes(mut self) -> Self {
        self.exclude_patterns.clear();
        self
    }

    /// Set the maximum depth.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Enable following symbolic links to files.
    pub fn follow_symlinks(mut self) -> Self {
        self.follow_symlinks = true;
        self
    }

    /// Set the output channel capacity.
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Set the native notification queue capacity.
    pub fn with_native_buffer(mut self, capacity: usize) -> Self {
        self.native_buffer = capacity;
        self
    }

    /// Enable the startup scan.
    pub fn with_initial_scan(mut self) -> Self {
        self.initial_scan = true;
        self
    }

    /// Set the rescan interval.
    pub fn with_rescan_interval(mut self, interval: Duration) -> Self {
        self.rescan_interval_secs = Some(interval.as_secs().max(1));
        self
    }

    /// Rescan interval as a duration, at least one second.
    pub fn rescan_interval(&self) -> Option<Duration> {
        self.rescan_interval_secs
            .map(|secs| Duration::from_secs(secs.max(1)))
    }

    /// Whether a [`crate::DirectoryScanner`] has any work to do.
    pub fn needs_scanner(&self) -> bool {
        self.initial_scan || self.rescan_interval_secs.is_some()
    }

    /// Channel capacity, never zero.
    pub(crate) fn buffer(&self) -> usize {
        self.event_buffer.max(1)
    }

    /// Native queue capacity, never zero.
    pub(crate) fn native_capacity(&self) -> usize {
        self.native_buffer.max(1)
    }

    /// Whether a path relative to the root is within `max_depth`.
    pub(crate) fn within_depth(&self, relative: &Path) -> bool {
        self.max_depth
            .is_none_or(|max| relative.components().count() <= max)
    }

    /// Compile the exclude patterns.
    pub fn exclude_set(&self) -> Result<ExcludeSet> {
        ExcludeSet::new(&self.exclude_patterns)
    }

    /// Get default exclude patterns.
    fn default_excludes() -> Vec<String> {
        vec![
            // Version control
            ".git".to_string(),
            ".svn".to_string(),
            ".hg".to_string(),
            // Editors
            "*.swp".to_string(),
            "*~".to_string(),
            // System files
            ".DS_Store".to_string(),
            "Thumbs.db".to_string(),
            // Partial downloads and temporary files
            "*.tmp".to_string(),
            "*.part".to_string(),
            "*.crdownload".to_string(),
        ]
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Compiled exclude patterns.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    components: Vec<glob::Pattern>,
    paths: Vec<glob::Pattern>,
}

impl ExcludeSet {
    /// Compile a list of patterns.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut set = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let compiled =
                glob::Pattern::new(pattern).map_err(|source| WatcherError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
            if pattern.contains('/') {
                set.paths.push(compiled);
            } else {
                set.components.push(compiled);
            }
        }
        Ok(set)
    }

    /// Check if a path relative to the watched root should be excluded.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        let names = relative.components().filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        });

        let mut joined = String::new();
        for name in names {
            if self.components.iter().any(|p| p.matches(&name)) {
                return true;
            }
            if !joined.is_empty() {
                joined.push('/');
            }
            joined.push_str(&name);
        }

        self.paths.iter().any(|p| p.matches(&joined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_watch_config_creation() {
        let config = WatchConfig::new("/home/user/photos")
            .with_max_depth(3)
            .with_rescan_interval(Duration::from_secs(600));

        assert_eq!(config.root, Path::new("/home/user/photos"));
        assert_eq!(config.max_depth, Some(3));
        assert_eq!(config.rescan_interval(), Some(Duration::from_secs(600)));
        assert!(config.needs_scanner());
        assert!(!WatchConfig::new("/tmp").needs_scanner());
    }

    #[test]
    fn test_zero_rescan_interval_is_clamped() {
        let config = WatchConfig {
            rescan_interval_secs: Some(0),
            ..WatchConfig::new("/tmp")
        };
        assert_eq!(config.rescan_interval(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_within_depth() {
        let config = WatchConfig::new("/tmp").with_max_depth(1);
        assert!(config.within_depth(Path::new("a.jpg")));
        assert!(!config.within_depth(Path::new("2019/a.jpg")));

        let config = WatchConfig::new("/tmp").with_max_depth(0);
        assert!(!config.within_depth(Path::new("a.jpg")));
        assert!(WatchConfig::new("/tmp").within_depth(Path::new("a/b/c/d.jpg")));
    }

    #[test]
    fn test_default_excludes() {
        let excludes = WatchConfig::new("/test").exclude_set().unwrap();

        assert!(excludes.is_excluded(Path::new(".git/config")));
        assert!(excludes.is_excluded(Path::new("albums/.DS_Store")));
        assert!(excludes.is_excluded(Path::new("albums/2019/IMG_0001.jpg.part")));
        assert!(!excludes.is_excluded(Path::new("albums/2019/IMG_0001.jpg")));
    }

    #[test]
    fn test_path_patterns_match_whole_relative_path() {
        let excludes = ExcludeSet::new(&["raw/*.cr2"]).unwrap();

        assert!(excludes.is_excluded(Path::new("raw/IMG_0001.cr2")));
        assert!(!excludes.is_excluded(Path::new("edited/IMG_0001.cr2")));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = ExcludeSet::new(&["[unclosed"]).unwrap_err();
        assert!(matches!(err, WatcherError::InvalidPattern { .. }));
    }
}
