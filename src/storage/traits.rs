//! Storage traits and error types
//!
//! This module defines the trait interfaces for the task queue, the record
//! store and run tracking, along with the associated error types.

use crate::state::{LeaseState, TaskKind};
use crate::storage::{
    CatalogRecord, CatalogRecordDraft, DownloadFilter, InsertSummary, RunKind, RunRecord,
    RunStatus, Task, TaskDraft, TaskFailure,
};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StorageError {
    /// Returns true for lock contention that is worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// The crawl work queue
///
/// Tasks are unique on `(kind, key)` and are never deleted; completed tasks
/// remain as an audit trail.
pub trait TaskStore {
    /// Bulk-inserts task drafts
    ///
    /// Drafts whose `(kind, key)` already exists are dropped silently. Any
    /// other insert failure is logged and counted, and the remaining drafts
    /// are still inserted.
    fn enqueue(&mut self, drafts: &[TaskDraft]) -> StorageResult<InsertSummary>;

    /// Atomically claims one task
    ///
    /// Pending tasks are claimed first, highest priority first, ties in
    /// insertion order. Only when none is pending is the oldest expired lease
    /// reclaimed. Returns the task as it was before the claim.
    fn claim(&mut self) -> StorageResult<Option<Task>>;

    /// Marks a task done, optionally recording an error
    ///
    /// Returns false (and logs) if no task has that id.
    fn complete(&mut self, task_id: i64, error: Option<&TaskFailure>) -> StorageResult<bool>;

    /// Returns a task to pending, clearing its lease and completion
    fn reset(&mut self, task_id: i64) -> StorageResult<bool>;

    /// Sets the priority of every task of `kind` whose key is in `keys`
    ///
    /// Returns the number of matched tasks.
    fn reprioritize(&mut self, kind: TaskKind, keys: &[String], priority: i64)
        -> StorageResult<usize>;

    /// Gets a task by ID
    fn get_task(&self, task_id: i64) -> StorageResult<Option<Task>>;

    /// Gets a task by its unique `(kind, key)` pair
    fn find_task(&self, kind: TaskKind, key: &str) -> StorageResult<Option<Task>>;

    /// Counts tasks of a kind in a lease state
    fn count_tasks(&self, kind: TaskKind, state: LeaseState) -> StorageResult<u64>;

    /// Counts done tasks that carry an error
    fn count_failed_tasks(&self) -> StorageResult<u64>;
}

/// Deduplicated catalog records plus the download lease queue over them
pub trait RecordStore {
    /// Bulk-inserts record drafts; the first write of an identity wins
    fn upsert(&mut self, drafts: &[CatalogRecordDraft]) -> StorageResult<InsertSummary>;

    /// Sets `similar_to` on every record of `package_id`
    ///
    /// Returns the number of records updated; zero is logged.
    fn set_similar(&mut self, package_id: &str, similar_ids: &[String]) -> StorageResult<usize>;

    /// Atomically claims one record whose binary has not been downloaded
    fn claim_download(&mut self, filter: DownloadFilter) -> StorageResult<Option<CatalogRecord>>;

    /// Marks a record's binary as downloaded
    fn complete_download(&mut self, record_id: i64) -> StorageResult<bool>;

    /// Clears a record's download lease
    fn reset_download(&mut self, record_id: i64) -> StorageResult<bool>;

    /// Gets a record by ID
    fn get_record(&self, record_id: i64) -> StorageResult<Option<CatalogRecord>>;

    /// Gets every record of a package, newest first
    fn find_records(&self, package_id: &str) -> StorageResult<Vec<CatalogRecord>>;

    /// Gets total record count
    fn count_records(&self) -> StorageResult<u64>;

    /// Counts records by download lease state
    fn count_downloads(&self, state: LeaseState) -> StorageResult<u64>;
}

/// Driver run bookkeeping
pub trait RunStore {
    /// Creates a new run in the `running` state
    fn create_run(&mut self, kind: RunKind, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Sets the final status and finish timestamp of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;
}

/// Everything the drivers and reports need from a backend
pub trait Storage: TaskStore + RecordStore + RunStore {}

impl<T: TaskStore + RecordStore + RunStore> Storage for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    #[test]
    fn test_busy_and_locked_are_transient() {
        for code in [ffi::SQLITE_BUSY, ffi::SQLITE_LOCKED] {
            let err = StorageError::Sqlite(rusqlite::Error::SqliteFailure(
                ffi::Error::new(code),
                None,
            ));
            assert!(err.is_transient());
        }
    }

    #[test]
    fn test_constraint_violation_is_not_transient() {
        let err = StorageError::Sqlite(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_CONSTRAINT),
            None,
        ));
        assert!(!err.is_transient());
        assert!(!StorageError::RunNotFound(3).is_transient());
    }
}
