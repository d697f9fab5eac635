//! Full-tree scans, once at startup and/or on a schedule.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::config::{ExcludeSet, WatchConfig};
use crate::error::{Result, WatcherError};
use crate::event::{DiscoveredFile, DiscoveryOrigin};
use crate::watcher::{DiscoveryStreams, resolve_root};

/// Walks the whole tree and reports every file, independently of the
/// watcher. Rescans pick up anything a failed upload or a dropped native
/// notification left behind.
pub struct DirectoryScanner {
    config: WatchConfig,
}

impl DirectoryScanner {
    /// Create a new scanner.
    pub fn new(config: WatchConfig) -> Self {
        Self { config }
    }

    /// Start scanning in the background.
    ///
    /// Runs one pass immediately when `initial_scan` is set, then one per
    /// `rescan_interval`. Without an interval the streams close after the
    /// first pass.
    pub async fn spawn(self, cancel: CancellationToken) -> Result<DiscoveryStreams> {
        let excludes = self.config.exclude_set()?;
        let root = resolve_root(&self.config.root).await?;

        let (files_tx, files_rx) = mpsc::channel(self.config.buffer());
        let (errors_tx, errors_rx) = mpsc::channel(self.config.buffer());

        let pass = ScanPass {
            root,
            excludes,
            max_depth: self.config.max_depth,
            follow_symlinks: self.config.follow_symlinks,
            files_tx,
            errors_tx,
            cancel: cancel.clone(),
        };
        let initial_scan = self.config.initial_scan;
        let interval = self.config.rescan_interval();

        let task = tokio::spawn(async move {
            if initial_scan {
                pass.run().await;
            }

            let Some(interval) = interval else {
                return;
            };

            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => pass.run().await,
                }
            }
        });

        Ok(DiscoveryStreams {
            files: files_rx,
            errors: errors_rx,
            task,
        })
    }
}

/// Everything one scan needs, cloned into the blocking walker.
#[derive(Clone)]
struct ScanPass {
    root: PathBuf,
    excludes: ExcludeSet,
    max_depth: Option<usize>,
    follow_symlinks: bool,
    files_tx: mpsc::Sender<DiscoveredFile>,
    errors_tx: mpsc::Sender<WatcherError>,
    cancel: CancellationToken,
}

impl ScanPass {
    async fn run(&self) {
        debug!("Scanning directory: {}", self.root.display());
        let pass = self.clone();
        match tokio::task::spawn_blocking(move || pass.walk()).await {
            Ok(found) => info!("Scanned {found} files under {}", self.root.display()),
            Err(e) => error!("Scan of {} aborted: {e}", self.root.display()),
        }
    }

    /// Blocking walk; returns the number of files reported.
    fn walk(&self) -> usize {
        let mut walker = WalkDir::new(&self.root).follow_links(false);
        if let Some(depth) = self.max_depth {
            walker = walker.max_depth(depth);
        }

        let mut found = 0;
        let entries = walker
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry.path()));

        for entry in entries {
            if self.cancel.is_cancelled() {
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    if self.errors_tx.blocking_send(WatcherError::Scan(e)).is_err() {
                        break;
                    }
                    continue;
                }
            };

            if !self.is_file(entry.path(), entry.file_type()) {
                continue;
            }

            let Some(file) = DiscoveredFile::new(&self.root, entry.path(), DiscoveryOrigin::Rescan)
            else {
                continue;
            };
            if self.files_tx.blocking_send(file).is_err() {
                break;
            }
            found += 1;
        }

        found
    }

    fn is_file(&self, path: &Path, file_type: std::fs::FileType) -> bool {
        if file_type.is_file() {
            return true;
        }
        file_type.is_symlink()
            && self.follow_symlinks
            && std::fs::metadata(path).is_ok_and(|target| target.is_file())
    }

    fn is_excluded(&self, path: &Path) -> bool {
        path.strip_prefix(&self.root)
            .is_ok_and(|relative| self.excludes.is_excluded(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_single_scan_reports_all_files_then_closes() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.jpg"), b"a").unwrap();
        std::fs::create_dir_all(temp_dir.path().join("2020/summer")).unwrap();
        std::fs::write(temp_dir.path().join("2020/summer/b.jpg"), b"b").unwrap();
        std::fs::write(temp_dir.path().join("2020/c.tmp"), b"c").unwrap();

        let config = WatchConfig::new(temp_dir.path()).with_initial_scan();
        let mut streams = DirectoryScanner::new(config)
            .spawn(CancellationToken::new())
            .await
            .unwrap();

        let mut seen = BTreeSet::new();
        while let Some(file) = timeout(Duration::from_secs(10), streams.files.recv())
            .await
            .unwrap()
        {
            assert_eq!(file.origin, DiscoveryOrigin::Rescan);
            seen.insert(file.relative_key());
        }

        assert_eq!(
            seen,
            BTreeSet::from(["2020/summer/b.jpg".to_string(), "a.jpg".to_string()])
        );
        streams.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_rescan_interval_still_scans() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.jpg"), b"a").unwrap();

        let cancel = CancellationToken::new();
        let config = WatchConfig {
            rescan_interval_secs: Some(0),
            ..WatchConfig::new(temp_dir.path())
        };
        let mut streams = DirectoryScanner::new(config)
            .spawn(cancel.clone())
            .await
            .unwrap();

        let file = timeout(Duration::from_secs(10), streams.files.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.relative_key(), "a.jpg");

        cancel.cancel();
        timeout(Duration::from_secs(10), streams.task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_periodic_scan_stops_on_cancel() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.jpg"), b"a").unwrap();

        let cancel = CancellationToken::new();
        let config =
            WatchConfig::new(temp_dir.path()).with_rescan_interval(Duration::from_secs(1));
        let mut streams = DirectoryScanner::new(config)
            .spawn(cancel.clone())
            .await
            .unwrap();

        // No initial scan: the first pass happens after one interval.
        let file = timeout(Duration::from_secs(10), streams.files.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.relative_key(), "a.jpg");

        cancel.cancel();
        timeout(Duration::from_secs(10), streams.task)
            .await
            .unwrap()
            .unwrap();
    }
}
