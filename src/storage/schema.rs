//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Store-Ripple database.
//! All timestamps are Unix milliseconds.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track driver runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Crawl work queue; (kind, key) is unique across all tasks ever created
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    key TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    leased_at INTEGER,
    completed_at INTEGER,
    error_status INTEGER,
    error_message TEXT,
    UNIQUE(kind, key)
);

CREATE INDEX IF NOT EXISTS idx_tasks_pending ON tasks(leased_at, priority DESC, id);
CREATE INDEX IF NOT EXISTS idx_tasks_lease ON tasks(leased_at, completed_at);

-- Discovered catalog entries, one per (package, version, device)
CREATE TABLE IF NOT EXISTS catalog_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    package_id TEXT NOT NULL,
    version_code INTEGER NOT NULL,
    device_profile TEXT NOT NULL,
    creator TEXT NOT NULL,
    price_micros INTEGER,
    payload TEXT NOT NULL,
    cross_references TEXT NOT NULL,
    similar_to TEXT,
    discovered_at INTEGER NOT NULL,
    download_leased_at INTEGER,
    download_completed_at INTEGER,
    UNIQUE(package_id, version_code, device_profile)
);

CREATE INDEX IF NOT EXISTS idx_records_package ON catalog_records(package_id);
CREATE INDEX IF NOT EXISTS idx_records_download ON catalog_records(download_leased_at, price_micros);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        let result = initialize_schema(&conn);

        assert!(result.is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["runs", "tasks", "catalog_records"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_task_identity_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let insert = "INSERT INTO tasks (kind, key, created_at) VALUES ('CRAWL_DETAILS', 'a', 0)";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
