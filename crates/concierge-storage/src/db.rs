//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::migrations;

/// Thread-safe SQLite database wrapper.
///
/// The connection is wrapped in a Mutex since rusqlite Connection is not
/// Sync.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path and run pending
    /// migrations.
    pub fn new(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("Failed to create data dir: {}", e)))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| StoreError::Backend(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| StoreError::Backend(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing and the scratch backend).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Backend(format!("Failed to open in-memory db: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| StoreError::Backend(format!("Failed to set pragmas: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with the underlying connection. The mutex is held
    /// for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Backend(format!("Database lock poisoned: {}", e)))?;
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

    fn count_contacts(db: &Database) -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))?)
        })
        .unwrap()
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(count_contacts(&db), 0);
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::new(&path).unwrap();
        assert_eq!(count_contacts(&db), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_wal_mode_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("wal.db")).unwrap();
        let mode: String = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(mode, "wal");
    }
}
