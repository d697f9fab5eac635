//! Discovery events and native change classification.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file that should be considered for archival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredFile {
    /// Absolute path to the file.
    pub absolute_path: PathBuf,

    /// Path relative to the watched root.
    pub relative_path: PathBuf,

    /// When the file was discovered.
    pub discovered_at: DateTime<Utc>,

    /// What produced this discovery.
    pub origin: DiscoveryOrigin,
}

impl DiscoveredFile {
    /// Create a discovery for `path` under `root`.
    ///
    /// Returns `None` when `path` is not inside `root`.
    pub fn new(root: &Path, path: impl Into<PathBuf>, origin: DiscoveryOrigin) -> Option<Self> {
        let absolute_path = path.into();
        let relative_path = absolute_path.strip_prefix(root).ok()?.to_path_buf();
        if relative_path.as_os_str().is_empty() {
            return None;
        }

        Some(Self {
            absolute_path,
            relative_path,
            discovered_at: Utc::now(),
            origin,
        })
    }

    /// The relative path with `/` separators, independent of the platform.
    pub fn relative_key(&self) -> String {
        self.relative_path
            .components()
            .filter_map(|component| match component {
                Component::Normal(name) => Some(name.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Where a discovery came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryOrigin {
    /// Listed while a watch was being installed.
    Enumeration,

    /// Reported by a native filesystem notification.
    Notification,

    /// Found by a full rescan.
    Rescan,
}

/// Kind of native change, reduced to what the watcher acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Path was created.
    Created,

    /// Path contents were modified.
    Modified,

    /// Path was renamed away (old path).
    RenamedFrom,

    /// Path was renamed into place (new path).
    RenamedTo,

    /// Path was removed.
    Removed,

    /// Permissions or other metadata changed.
    Metadata,

    /// Access and anything else.
    Other,
}

impl ChangeKind {
    /// Whether the path should be (re-)discovered.
    pub fn triggers_discovery(self) -> bool {
        matches!(self, Self::Created | Self::Modified | Self::RenamedTo)
    }

    /// Whether a watch on the path is gone.
    pub fn retires_watch(self) -> bool {
        matches!(self, Self::RenamedFrom | Self::Removed)
    }
}

impl From<notify::EventKind> for ChangeKind {
    fn from(kind: notify::EventKind) -> Self {
        use notify::event::{ModifyKind, RenameMode};

        match kind {
            notify::EventKind::Create(_) => Self::Created,
            notify::EventKind::Modify(modify_kind) => match modify_kind {
                ModifyKind::Name(RenameMode::From) => Self::RenamedFrom,
                ModifyKind::Name(RenameMode::To) => Self::RenamedTo,
                // Backends that cannot tell the two sides apart.
                ModifyKind::Name(_) => Self::RenamedTo,
                ModifyKind::Metadata(_) => Self::Metadata,
                _ => Self::Modified,
            },
            notify::EventKind::Remove(_) => Self::Removed,
            _ => Self::Other,
        }
    }
}

/// Split a native event into per-path changes.
///
/// A paired rename carries the old path first and the new path second.
pub fn changes(event: &notify::Event) -> Vec<(ChangeKind, &Path)> {
    use notify::event::{ModifyKind, RenameMode};

    if let (notify::EventKind::Modify(ModifyKind::Name(RenameMode::Both)), [from, to]) =
        (event.kind, event.paths.as_slice())
    {
        return vec![
            (ChangeKind::RenamedFrom, from.as_path()),
            (ChangeKind::RenamedTo, to.as_path()),
        ];
    }

    let kind = ChangeKind::from(event.kind);
    event.paths.iter().map(|path| (kind, path.as_path())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, ModifyKind, RenameMode};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_discovered_file_relative_path() {
        let file = DiscoveredFile::new(
            Path::new("/media"),
            "/media/2019/summer/beach.jpg",
            DiscoveryOrigin::Notification,
        )
        .unwrap();

        assert_eq!(file.relative_path, Path::new("2019/summer/beach.jpg"));
        assert_eq!(file.relative_key(), "2019/summer/beach.jpg");
    }

    #[test]
    fn test_discovered_file_outside_root() {
        assert!(DiscoveredFile::new(Path::new("/media"), "/etc/passwd", DiscoveryOrigin::Rescan)
            .is_none());
        assert!(DiscoveredFile::new(Path::new("/media"), "/media", DiscoveryOrigin::Rescan)
            .is_none());
    }

    #[test]
    fn test_change_kind_mapping() {
        let created = ChangeKind::from(notify::EventKind::Create(CreateKind::File));
        let written = ChangeKind::from(notify::EventKind::Modify(ModifyKind::Data(
            DataChange::Content,
        )));
        let chmod = ChangeKind::from(notify::EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions,
        )));

        assert!(created.triggers_discovery());
        assert!(written.triggers_discovery());
        assert_eq!(chmod, ChangeKind::Metadata);
        assert!(!chmod.triggers_discovery());
    }

    #[test]
    fn test_paired_rename_splits_paths() {
        let event = notify::Event::new(notify::EventKind::Modify(ModifyKind::Name(
            RenameMode::Both,
        )))
        .add_path(PathBuf::from("/media/old.jpg"))
        .add_path(PathBuf::from("/media/new.jpg"));

        let split = changes(&event);
        assert_eq!(
            split,
            vec![
                (ChangeKind::RenamedFrom, Path::new("/media/old.jpg")),
                (ChangeKind::RenamedTo, Path::new("/media/new.jpg")),
            ]
        );
        assert!(split[0].0.retires_watch());
    }
}
