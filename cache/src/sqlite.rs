//! SQLite-backed cache, one table per archive.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::{CacheError, Result};
use crate::{ArchiveCache, CacheRecord, validate_archive_name};

/// Persistent cache stored in a SQLite database.
///
/// Queries run on tokio's blocking pool; the single connection is shared
/// behind a mutex, so concurrent callers are serialised.
#[derive(Clone)]
pub struct SqliteCache {
    archive: String,
    /// Quoted table identifier.
    table: Arc<str>,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCache {
    /// Open (or create) the cache database at `path`.
    ///
    /// This will create the parent directory if it doesn't exist.
    pub fn open(path: impl AsRef<Path>, archive: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        info!("Opened archive cache at {}", path.display());

        Self::with_connection(conn, archive.into())
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(archive: impl Into<String>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, archive.into())
    }

    /// Default database location under the user's cache directory.
    pub fn default_path() -> Result<PathBuf> {
        dirs::cache_dir()
            .map(|dir| dir.join("media-archive").join("cache.db"))
            .ok_or(CacheError::NoCacheDir)
    }

    fn with_connection(conn: Connection, archive: String) -> Result<Self> {
        let archive = validate_archive_name(archive)?;
        let table = quote_identifier(&archive);

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                key TEXT PRIMARY KEY NOT NULL,
                archived_at INTEGER NOT NULL
            );"
        ))?;

        Ok(Self {
            archive,
            table: table.into(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let table = Arc::clone(&self.table);

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| CacheError::Poisoned)?;
            f(&conn, &table[..])
        })
        .await?
    }
}

#[async_trait]
impl ArchiveCache for SqliteCache {
    fn archive(&self) -> &str {
        &self.archive
    }

    async fn set(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        let archived_at = Utc::now().timestamp_millis();

        let inserted = self
            .with_conn(move |conn, table| {
                let sql = format!(
                    "INSERT OR IGNORE INTO {table} (key, archived_at) VALUES (?1, ?2)"
                );
                Ok(conn.execute(&sql, params![key, archived_at])?)
            })
            .await?;

        if inserted == 0 {
            debug!("Key already cached in archive {}", self.archive);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheRecord>> {
        let key = key.to_string();

        self.with_conn(move |conn, table| {
            let sql = format!("SELECT archived_at FROM {table} WHERE key = ?1");
            let millis: Option<i64> = conn
                .query_row(&sql, params![key], |row| row.get(0))
                .optional()?;

            millis
                .map(|millis| {
                    let archived_at = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(
                        || CacheError::CorruptRecord {
                            key: key.clone(),
                            detail: format!("timestamp {millis} out of range"),
                        },
                    )?;
                    Ok(CacheRecord {
                        key: key.clone(),
                        archived_at,
                    })
                })
                .transpose()
        })
        .await
    }

    async fn purge(&self, key: &str) -> Result<()> {
        let key = key.to_string();

        self.with_conn(move |conn, table| {
            let sql = format!("DELETE FROM {table} WHERE key = ?1");
            conn.execute(&sql, params![key])?;
            Ok(())
        })
        .await
    }

    async fn count(&self) -> Result<usize> {
        self.with_conn(|conn, table| {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }
}

/// Quote an archive name for use as a table identifier.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
