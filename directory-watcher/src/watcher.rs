//! Recursive directory watcher implementation.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{ExcludeSet, WatchConfig};
use crate::error::{Result, WatcherError};
use crate::event::{DiscoveredFile, DiscoveryOrigin, changes};

/// Output of a discovery source: discovered files, errors, and the task
/// producing them. Both channels close when the task ends.
#[derive(Debug)]
pub struct DiscoveryStreams {
    /// Discovered files.
    pub files: mpsc::Receiver<DiscoveredFile>,

    /// Non-fatal errors.
    pub errors: mpsc::Receiver<WatcherError>,

    /// The producing task.
    pub task: JoinHandle<()>,
}

/// Watches a directory tree with one non-recursive native watch per
/// directory and reports every file found in it.
pub struct RecursiveWatcher;

impl RecursiveWatcher {
    /// Install watches over `config.root` and start the event loop.
    ///
    /// The root watch is registered before this returns, so anything created
    /// under the root afterwards is observed. Failure to resolve or watch the
    /// root is returned; every later failure goes to the error stream.
    pub async fn install(config: WatchConfig, cancel: CancellationToken) -> Result<DiscoveryStreams> {
        let excludes = config.exclude_set()?;
        let root = resolve_root(&config.root).await?;

        let (native_tx, native_rx) = mpsc::channel(config.native_capacity());
        let queue = NativeQueue {
            tx: native_tx,
            dropped: Arc::new(AtomicUsize::new(0)),
        };
        let dropped = Arc::clone(&queue.dropped);
        let mut watcher = notify::recommended_watcher(move |res: NativeEvent| queue.push(res))?;

        watcher
            .watch(&root, RecursiveMode::NonRecursive)
            .map_err(|source| WatcherError::Registration {
                path: root.clone(),
                source,
            })?;
        info!("Watching directory tree: {}", root.display());

        let (files_tx, files_rx) = mpsc::channel(config.buffer());
        let (errors_tx, errors_rx) = mpsc::channel(config.buffer());

        let event_loop = EventLoop {
            watched: HashSet::from([root.clone()]),
            root,
            watcher,
            dropped,
            excludes,
            config,
            files_tx,
            errors_tx,
            cancel,
        };
        let task = tokio::spawn(event_loop.run(native_rx));

        Ok(DiscoveryStreams {
            files: files_rx,
            errors: errors_rx,
            task,
        })
    }
}

/// Canonicalize the root and check that it is a directory.
pub(crate) async fn resolve_root(root: &Path) -> Result<PathBuf> {
    let canonical = fs::canonicalize(root).await.map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => WatcherError::DirectoryNotFound(root.to_path_buf()),
        _ => WatcherError::Io(e),
    })?;

    if !fs::metadata(&canonical).await?.is_dir() {
        return Err(WatcherError::NotADirectory(canonical));
    }

    Ok(canonical)
}

type NativeEvent = std::result::Result<notify::Event, notify::Error>;

/// Sending half of the native queue, owned by notify's callback.
///
/// notify's `watch` round-trips through the thread that runs the callback,
/// so pushing must never block: when the queue is full the notification is
/// dropped and counted, and the event loop re-enumerates the tree.
struct NativeQueue {
    tx: mpsc::Sender<NativeEvent>,
    dropped: Arc<AtomicUsize>,
}

impl NativeQueue {
    fn push(&self, event: NativeEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("watcher stopped, dropping native event");
            }
        }
    }
}

/// What a path turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Directory,
    File,
    Skip,
}

/// State owned by the watcher task.
struct EventLoop {
    root: PathBuf,
    watcher: RecommendedWatcher,
    /// Directories with an active watch.
    watched: HashSet<PathBuf>,
    /// Notifications dropped since the last re-enumeration.
    dropped: Arc<AtomicUsize>,
    excludes: ExcludeSet,
    config: WatchConfig,
    files_tx: mpsc::Sender<DiscoveredFile>,
    errors_tx: mpsc::Sender<WatcherError>,
    cancel: CancellationToken,
}

impl EventLoop {
    async fn run(
        mut self,
        mut native_rx: mpsc::Receiver<NativeEvent>,
    ) {
        // The root is already registered; list what was there before.
        let root = self.root.clone();
        self.add(root).await;
        debug!(
            "Initial enumeration of {} complete ({} directories watched)",
            self.root.display(),
            self.watched.len()
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = native_rx.recv() => match next {
                    Some(Ok(event)) => self.handle(event).await,
                    Some(Err(e)) => self.report(WatcherError::Notify(e)).await,
                    None => break,
                },
            }
            self.recover_dropped().await;
        }

        info!(
            "Stopped watching {} ({} directories)",
            self.root.display(),
            self.watched.len()
        );
    }

    /// Watch `dir` and everything below it, then report the files found.
    ///
    /// Each directory is registered before it is listed: a file created
    /// between the two steps is seen by both and reported twice, never zero
    /// times.
    async fn add(&mut self, dir: PathBuf) {
        let mut pending = vec![dir];

        while let Some(dir) = pending.pop() {
            if self.cancel.is_cancelled() {
                return;
            }

            if !self.watched.contains(&dir) {
                if let Err(source) = self.watcher.watch(&dir, RecursiveMode::NonRecursive) {
                    self.report(WatcherError::Registration { path: dir, source })
                        .await;
                    continue;
                }
                debug!("Started watching: {}", dir.display());
                self.watched.insert(dir.clone());
            }

            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(source) => {
                    self.report(WatcherError::Enumeration { path: dir, source })
                        .await;
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(source) => {
                        self.report(WatcherError::Enumeration {
                            path: dir.clone(),
                            source,
                        })
                        .await;
                        break;
                    }
                };

                let path = entry.path();
                if self.is_excluded(&path) {
                    continue;
                }

                match self.classify(&path).await {
                    Ok(EntryKind::Directory) if self.may_descend(&path) => pending.push(path),
                    Ok(EntryKind::File) => self.emit(&path, DiscoveryOrigin::Enumeration).await,
                    Ok(_) => {}
                    // Deleted between listing and inspection.
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(source) => self.report(WatcherError::Inspect { path, source }).await,
                }
            }
        }
    }

    /// Re-enumerate the whole tree if notifications were dropped.
    ///
    /// A drop only happens while the queue is full, so at least one queued
    /// notification is still to be received and this check runs after it.
    async fn recover_dropped(&mut self) {
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped == 0 {
            return;
        }

        warn!(
            "Dropped {dropped} notifications under {}, re-enumerating",
            self.root.display()
        );
        self.report(WatcherError::Overflow { dropped }).await;
        let root = self.root.clone();
        self.add(root).await;
    }

    async fn handle(&mut self, event: notify::Event) {
        for (kind, path) in changes(&event) {
            if kind.retires_watch() {
                self.forget(path);
                continue;
            }

            if !kind.triggers_discovery() || self.is_excluded(path) {
                continue;
            }

            match self.classify(path).await {
                Ok(EntryKind::Directory) if self.may_descend(path) => {
                    self.add(path.to_path_buf()).await;
                }
                Ok(EntryKind::File) => self.emit(path, DiscoveryOrigin::Notification).await,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    trace!("{} vanished before it could be inspected", path.display());
                }
                Err(source) => {
                    self.report(WatcherError::Inspect {
                        path: path.to_path_buf(),
                        source,
                    })
                    .await;
                }
            }
        }
    }

    /// Drop `path` and its descendants from the watch set. The OS removes
    /// the watches itself when the directories go away.
    fn forget(&mut self, path: &Path) {
        if self.watched.contains(path) {
            self.watched.retain(|watched| !watched.starts_with(path));
            debug!("Watch target gone: {}", path.display());
        }
    }

    async fn classify(&self, path: &Path) -> io::Result<EntryKind> {
        let metadata = fs::symlink_metadata(path).await?;
        let file_type = metadata.file_type();

        if file_type.is_dir() {
            Ok(EntryKind::Directory)
        } else if file_type.is_file() {
            Ok(EntryKind::File)
        } else if file_type.is_symlink() && self.config.follow_symlinks {
            match fs::metadata(path).await {
                Ok(target) if target.is_file() => Ok(EntryKind::File),
                Ok(_) => Ok(EntryKind::Skip),
                // Dangling link.
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(EntryKind::Skip),
                Err(e) => Err(e),
            }
        } else {
            Ok(EntryKind::Skip)
        }
    }

    fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.root).ok()
    }

    fn is_excluded(&self, path: &Path) -> bool {
        match self.relative(path) {
            Some(relative) => self.excludes.is_excluded(relative),
            None => true,
        }
    }

    /// Whether files inside the directory `dir` are within `max_depth`.
    fn may_descend(&self, dir: &Path) -> bool {
        match (self.config.max_depth, self.relative(dir)) {
            (None, Some(_)) => true,
            (Some(max), Some(relative)) => relative.components().count() < max,
            (_, None) => false,
        }
    }

    async fn emit(&self, path: &Path, origin: DiscoveryOrigin) {
        let Some(file) = DiscoveredFile::new(&self.root, path, origin) else {
            return;
        };
        if !self.config.within_depth(&file.relative_path) {
            return;
        }
        debug!("Discovered file: {} ({origin:?})", file.relative_path.display());

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            sent = self.files_tx.send(file) => {
                if sent.is_err() {
                    trace!("discovery consumer gone");
                }
            }
        }
    }

    async fn report(&self, error: WatcherError) {
        debug!("Watcher error: {error}");

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            sent = self.errors_tx.send(error) => {
                if sent.is_err() {
                    trace!("error consumer gone");
                }
            }
        }
    }
}
