//! Dedup and destination key derivation.

use sha2::{Digest, Sha256};

use media_archive_directory_watcher::DiscoveredFile;

/// Dedup key for file content: `sha256:` followed by the lowercase hex digest.
pub fn content_hash(content: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(content))
}

/// Dedup key for a path: the relative path with `/` separators.
pub fn path_key(file: &DiscoveredFile) -> String {
    file.relative_key()
}

/// Object key for a file: `{archive}/{relative path}`.
pub fn destination_key(archive: &str, file: &DiscoveredFile) -> String {
    format!("{}/{}", archive.trim_matches('/'), file.relative_key())
}
