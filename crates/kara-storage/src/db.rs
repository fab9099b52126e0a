//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode, a busy timeout and recommended PRAGMAs on
//! initialization.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;
use tracing::info;

use kara_core::config::StorageConfig;
use kara_core::error::KaraError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
///
/// Shared read-write by the loader, the enrichment loader and the run
/// recorder. Duplicate suppression relies on table uniqueness constraints,
/// so the mutex is only held for single statements.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path with the default busy
    /// timeout.
    pub fn new(path: &Path) -> Result<Self, KaraError> {
        Self::open(path, Duration::from_millis(StorageConfig::default().busy_timeout_ms))
    }

    /// Open the database described by the storage section of the config.
    pub fn from_config(config: &StorageConfig) -> Result<Self, KaraError> {
        Self::open(&config.endpoint, Duration::from_millis(config.busy_timeout_ms))
    }

    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, foreign keys, a busy
    /// timeout bounding every write, and runs all pending migrations.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, KaraError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| KaraError::Storage(format!("Failed to open database: {}", e)))?;

        Self::configure(&conn, busy_timeout)?;
        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, KaraError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| KaraError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        Self::configure(&conn, Duration::from_millis(StorageConfig::default().busy_timeout_ms))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    fn configure(conn: &Connection, busy_timeout: Duration) -> Result<(), KaraError> {
        conn.busy_timeout(busy_timeout)
            .map_err(|e| KaraError::Storage(format!("Failed to set busy timeout: {}", e)))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| KaraError::Storage(format!("Failed to set pragmas: {}", e)))
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// This is the primary way to interact with the database. The mutex
    /// is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, KaraError>
    where
        F: FnOnce(&Connection) -> Result<T, KaraError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| KaraError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM image_detections", [], |row| row.get(0))
                .map_err(|e| KaraError::Storage(e.to_string()))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_file_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("kara.db");
        let db = Database::new(&path).unwrap();

        db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM sources", [], |row| row.get(0))
                .map_err(|e| KaraError::Storage(e.to_string()))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kara.db");
        drop(Database::new(&path).unwrap());
        let db = Database::new(&path).unwrap();
        let version: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
                    .map_err(|e| KaraError::Storage(e.to_string()))
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_wal_mode_enabled() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .map_err(|e| KaraError::Storage(e.to_string()))?;
            // In-memory databases report "memory" instead of "wal".
            assert!(mode == "wal" || mode == "memory", "unexpected mode: {}", mode);
            Ok(())
        })
        .unwrap();
    }
}
