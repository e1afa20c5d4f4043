//! SQLite storage module
//!
//! A single database file backs the response cache, the served-page ledger
//! and the genre taxonomy. The connection is shared behind a mutex, so
//! concurrent requests serialize on short statements rather than on whole
//! resolutions.

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while talking to the database
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to determine the default database location
    #[error("Failed to determine cache directory location")]
    CacheDirectoryNotFound,

    /// Failed to create the directory holding the database
    #[error("Failed to create database directory at {path}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to open the database file
    #[error("Failed to open database {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// A statement failed
    #[error("Database query failed: {0}")]
    Query(#[from] rusqlite::Error),

    /// Another thread panicked while holding the connection
    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cache (
    key          TEXT PRIMARY KEY,
    value        TEXT NOT NULL,
    inserted_at  INTEGER NOT NULL,
    ttl_seconds  INTEGER NOT NULL,
    page         INTEGER NOT NULL,
    skip         INTEGER NOT NULL,
    genre        TEXT,
    year         TEXT,
    rating       TEXT,
    media_type   TEXT NOT NULL,
    sort_order   TEXT
);

CREATE TABLE IF NOT EXISTS served_pages (
    signature    TEXT NOT NULL,
    page         INTEGER NOT NULL,
    skip         INTEGER NOT NULL,
    served_at    INTEGER NOT NULL,
    PRIMARY KEY (signature, page)
);

CREATE TABLE IF NOT EXISTS genres (
    genre_id     INTEGER NOT NULL,
    genre_name   TEXT NOT NULL,
    media_type   TEXT NOT NULL,
    language     TEXT NOT NULL,
    PRIMARY KEY (genre_id, media_type, language)
);

CREATE INDEX IF NOT EXISTS genres_by_name ON genres (media_type, genre_name);
CREATE INDEX IF NOT EXISTS genres_by_language ON genres (language);
";

/// Shared SQLite handle
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens the database in the system's standard cache directory
    pub fn open_default() -> Result<Self, StorageError> {
        Self::open(&default_database_path()?)
    }

    /// Opens or creates the database at the given path
    ///
    /// Missing parent directories are created.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!(path = %path.display(), "Opening catalog database");

        let conn = Connection::open(path).map_err(|e| StorageError::OpenFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        // WAL keeps readers from blocking on the single writer
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::with_schema(conn)
    }

    /// Opens a throwaway in-memory database
    pub fn open_in_memory() -> Result<Self, StorageError> {
        debug!("Opening in-memory catalog database");
        let conn = Connection::open_in_memory()?;
        Self::with_schema(conn)
    }

    fn with_schema(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs a closure with shared access to the connection
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs a closure with exclusive access, needed for transactions
    pub(crate) fn with_conn_mut<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError>,
    {
        let mut conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        f(&mut conn)
    }
}

/// Location of the database when none is configured
///
/// Resolves to `<cache dir>/catalog-dice/catalog.db` using the platform's
/// conventions (e.g. `~/.cache/catalog-dice` on Linux).
pub fn default_database_path() -> Result<PathBuf, StorageError> {
    let proj_dirs = directories::ProjectDirs::from("org", "catalogdice", "catalog-dice")
        .ok_or(StorageError::CacheDirectoryNotFound)?;
    Ok(proj_dirs.cache_dir().join("catalog.db"))
}
