//! Database schema migrations.
//!
//! Applies the CRM schema: contacts, calendar_events, alerts, profiles and
//! the schema_migrations bookkeeping table. Timestamps are stored as Unix
//! milliseconds.

use rusqlite::Connection;
use tracing::info;

use crate::error::{StoreError, StoreResult};

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| StoreError::Backend(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::Backend(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: crm_schema");
    }

    Ok(())
}

/// Version 1: CRM schema.
fn apply_v1(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS contacts (
            id              TEXT PRIMARY KEY NOT NULL,
            user_id         TEXT NOT NULL,
            first_name      TEXT NOT NULL,
            last_name       TEXT,
            email           TEXT,
            phone           TEXT,
            mobile_phone    TEXT,
            work_phone      TEXT,
            company         TEXT,
            job_title       TEXT,
            address         TEXT,
            birthday        TEXT,
            notes           TEXT,
            website         TEXT,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_contacts_user_updated
            ON contacts (user_id, updated_at DESC);

        CREATE INDEX IF NOT EXISTS idx_contacts_user_name
            ON contacts (user_id, first_name COLLATE NOCASE, last_name COLLATE NOCASE);

        CREATE TABLE IF NOT EXISTS calendar_events (
            id              TEXT PRIMARY KEY NOT NULL,
            user_id         TEXT NOT NULL,
            title           TEXT NOT NULL,
            description     TEXT,
            location        TEXT,
            start_time      INTEGER NOT NULL,
            end_time        INTEGER NOT NULL,
            attendees       TEXT NOT NULL DEFAULT '[]',
            external_id     TEXT,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            CHECK (end_time >= start_time)
        );

        CREATE INDEX IF NOT EXISTS idx_events_user_start
            ON calendar_events (user_id, start_time ASC);

        CREATE TABLE IF NOT EXISTS alerts (
            id              TEXT PRIMARY KEY NOT NULL,
            user_id         TEXT NOT NULL,
            title           TEXT NOT NULL,
            description     TEXT,
            priority        INTEGER NOT NULL DEFAULT 2,
            status          TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending', 'completed', 'dismissed')),
            due_at          INTEGER,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_alerts_user_priority
            ON alerts (user_id, priority DESC, due_at ASC);

        CREATE TABLE IF NOT EXISTS profiles (
            user_id             TEXT PRIMARY KEY NOT NULL,
            display_name        TEXT,
            company             TEXT,
            job_title           TEXT,
            timezone            TEXT,
            email_notifications INTEGER NOT NULL DEFAULT 1,
            updated_at          INTEGER NOT NULL
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'crm_schema');
        ",
    )
    .map_err(|e| StoreError::Backend(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_contacts_table_exists() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO contacts (id, user_id, first_name, created_at, updated_at)
             VALUES ('c-1', 'u1', 'Jane', 0, 0)",
            [],
        )
        .unwrap();

        let name: String = conn
            .query_row("SELECT first_name FROM contacts WHERE id = 'c-1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(name, "Jane");
    }

    #[test]
    fn test_event_end_before_start_rejected() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO calendar_events (id, user_id, title, start_time, end_time, created_at, updated_at)
             VALUES ('e-1', 'u1', 'Standup', 1000, 500, 0, 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_alert_status_check() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO alerts (id, user_id, title, status, created_at, updated_at)
             VALUES ('a-1', 'u1', 'Call', 'archived', 0, 0)",
            [],
        );
        assert!(result.is_err());
    }
}
