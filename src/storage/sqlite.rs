//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the task, record
//! and run stores. Claims are serialized by SQLite's write lock: the
//! select-then-update of [`SqliteStorage::find_one_and_update`] runs in a
//! single `BEGIN IMMEDIATE` transaction, so two connections can never
//! claim the same row.

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::state::{LeaseState, TaskKind};
use crate::storage::query::{Condition, FindAndModify, Order, Table};
use crate::storage::retry::RetryPolicy;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{RecordStore, RunStore, StorageError, StorageResult, TaskStore};
use crate::storage::{
    CatalogRecord, CatalogRecordDraft, DownloadFilter, InsertSummary, RunKind, RunRecord,
    RunStatus, Task, TaskDraft, TaskFailure,
};
use crate::RippleError;
use rusqlite::types::{Type, Value};
use rusqlite::{
    ffi, params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row,
    TransactionBehavior,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const TASK_COLUMNS: &str =
    "id, kind, key, priority, created_at, leased_at, completed_at, error_status, error_message";

const RECORD_COLUMNS: &str = "id, package_id, version_code, device_profile, creator, price_micros, \
     payload, cross_references, similar_to, discovered_at, download_leased_at, download_completed_at";

// SQLite's default limit on bound parameters is 32766; stay well below it.
const KEYS_PER_STATEMENT: usize = 500;

/// Lease and retry settings applied by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// A crawl task leased longer than this is reclaimed
    pub max_task_duration: Duration,

    /// A download leased longer than this is reclaimed
    pub max_download_duration: Duration,

    /// Retry policy for lock contention
    pub retry: RetryPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_task_duration: Duration::from_secs(600),
            max_download_duration: Duration::from_secs(1800),
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreSettings {
    /// Builds store settings from the loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_task_duration: Duration::from_secs(config.crawler.max_task_duration_seconds),
            max_download_duration: Duration::from_secs(
                config.download.max_download_duration_seconds,
            ),
            retry: RetryPolicy::new(
                config.store.retry_attempts,
                Duration::from_millis(config.store.retry_delay_ms),
            ),
        }
    }
}

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
    clock: Arc<dyn Clock>,
    settings: StoreSettings,
}

impl SqliteStorage {
    /// Opens or creates a database with default settings
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    pub fn new(path: &Path) -> Result<Self, RippleError> {
        Self::open(path, StoreSettings::default())
    }

    /// Opens or creates a database with the given settings
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(RippleError)` - Failed to open database
    pub fn open(path: &Path, settings: StoreSettings) -> Result<Self, RippleError> {
        let conn = Connection::open(path)?;

        // Several worker processes share the file; WAL lets readers proceed
        // while one of them holds the write lock.
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;
        conn.busy_timeout(Duration::from_millis(500))?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn,
            clock: Arc::new(SystemClock),
            settings,
        })
    }

    /// Creates an in-memory database with default settings
    pub fn new_in_memory() -> Result<Self, RippleError> {
        Self::open_in_memory(StoreSettings::default())
    }

    /// Creates an in-memory database with the given settings
    pub fn open_in_memory(settings: StoreSettings) -> Result<Self, RippleError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            clock: Arc::new(SystemClock),
            settings,
        })
    }

    /// Replaces the time source used for lease timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Atomically selects one row and applies an update to it
    ///
    /// The row is chosen by the query's filter and sort, mapped with `map`
    /// as it was *before* the update, then updated by id. Both steps run in
    /// one immediate transaction, retried on lock contention.
    ///
    /// `columns` must list `id` first.
    pub fn find_one_and_update<T, F>(
        &mut self,
        query: &FindAndModify,
        columns: &str,
        map: F,
    ) -> StorageResult<Option<T>>
    where
        F: Fn(&Row<'_>) -> rusqlite::Result<T>,
    {
        if query.update.is_empty() {
            return Err(StorageError::Database(
                "find-and-modify requires at least one update".to_string(),
            ));
        }

        let policy = self.settings.retry;
        let conn = &mut self.conn;
        let (select_sql, select_params) = query.select_sql(columns);

        policy.run("find-and-modify", || {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let found = tx
                .query_row(&select_sql, params_from_iter(select_params.iter()), |row| {
                    let id: i64 = row.get(0)?;
                    Ok((id, map(row)?))
                })
                .optional()?;

            let Some((id, before)) = found else {
                return Ok(None);
            };

            let (update_sql, update_params) = query.update_sql(id);
            tx.execute(&update_sql, params_from_iter(update_params.iter()))?;
            tx.commit()?;

            Ok(Some(before))
        })
    }

    /// Inserts prepared rows one by one inside a single transaction
    ///
    /// Unique-constraint violations are counted as duplicates; any other
    /// per-row failure is logged and counted without aborting the batch.
    fn insert_batch(
        &mut self,
        operation: &str,
        sql: &str,
        rows: &[(String, Vec<Value>)],
    ) -> StorageResult<InsertSummary> {
        if rows.is_empty() {
            return Ok(InsertSummary::default());
        }

        let policy = self.settings.retry;
        let conn = &mut self.conn;

        policy.run(operation, || {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut summary = InsertSummary::default();
            {
                let mut stmt = tx.prepare(sql)?;
                for (label, values) in rows {
                    match stmt.execute(params_from_iter(values.iter())) {
                        Ok(_) => summary.inserted += 1,
                        Err(e) if is_unique_violation(&e) => summary.duplicates += 1,
                        Err(e) => {
                            tracing::error!("{}: failed to insert {}: {}", operation, label, e);
                            summary.failed += 1;
                        }
                    }
                }
            }
            tx.commit()?;
            Ok(summary)
        })
    }

    fn count(&self, sql: &str, values: Vec<Value>) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row(sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl TaskStore for SqliteStorage {
    fn enqueue(&mut self, drafts: &[TaskDraft]) -> StorageResult<InsertSummary> {
        let now = self.now();
        let rows: Vec<(String, Vec<Value>)> = drafts
            .iter()
            .map(|draft| {
                (
                    format!("{} {}", draft.kind, draft.key),
                    vec![
                        Value::Text(draft.kind.to_db_string().to_string()),
                        Value::Text(draft.key.clone()),
                        Value::Integer(draft.priority),
                        Value::Integer(now),
                    ],
                )
            })
            .collect();

        let summary = self.insert_batch(
            "enqueue",
            "INSERT INTO tasks (kind, key, priority, created_at) VALUES (?1, ?2, ?3, ?4)",
            &rows,
        )?;

        tracing::debug!(
            "Enqueued {} tasks ({} already known, {} failed)",
            summary.inserted,
            summary.duplicates,
            summary.failed
        );
        Ok(summary)
    }

    fn claim(&mut self) -> StorageResult<Option<Task>> {
        let now = self.now();

        let pending = FindAndModify::new(Table::Tasks)
            .filter(Condition::IsNull("leased_at"))
            .filter(Condition::IsNull("completed_at"))
            .sort(Order::Desc("priority"))
            .sort(Order::Asc("id"))
            .set("leased_at", now);

        if let Some(task) = self.find_one_and_update(&pending, TASK_COLUMNS, task_from_row)? {
            return Ok(Some(task));
        }

        // Nothing fresh: look for a lease that was taken but never finished
        let deadline =
            LeaseState::expiry_cutoff(now, duration_millis(self.settings.max_task_duration));
        let expired = FindAndModify::new(Table::Tasks)
            .filter(Condition::Before("leased_at", deadline))
            .filter(Condition::IsNull("completed_at"))
            .sort(Order::Asc("leased_at"))
            .sort(Order::Asc("id"))
            .set("leased_at", now);

        let task = self.find_one_and_update(&expired, TASK_COLUMNS, task_from_row)?;
        if let Some(task) = &task {
            tracing::info!(
                "Reclaimed expired task {} ({} {})",
                task.id,
                task.kind,
                task.key
            );
        }
        Ok(task)
    }

    fn complete(&mut self, task_id: i64, error: Option<&TaskFailure>) -> StorageResult<bool> {
        let now = self.now();
        let query = FindAndModify::new(Table::Tasks)
            .filter(Condition::Eq("id", Value::Integer(task_id)))
            .set("completed_at", now)
            .set("error_status", error.and_then(|e| e.status).map(i64::from))
            .set("error_message", error.map(|e| e.message.clone()));

        let found = self
            .find_one_and_update(&query, "id", |row| row.get::<_, i64>(0))?
            .is_some();
        if !found {
            tracing::error!("Unable to set task {} as completed: id not found", task_id);
        }
        Ok(found)
    }

    fn reset(&mut self, task_id: i64) -> StorageResult<bool> {
        let query = FindAndModify::new(Table::Tasks)
            .filter(Condition::Eq("id", Value::Integer(task_id)))
            .unset("leased_at")
            .unset("completed_at")
            .unset("error_status")
            .unset("error_message");

        let found = self
            .find_one_and_update(&query, "id", |row| row.get::<_, i64>(0))?
            .is_some();
        if !found {
            tracing::error!("Unable to reset task {}: id not found", task_id);
        }
        Ok(found)
    }

    fn reprioritize(
        &mut self,
        kind: TaskKind,
        keys: &[String],
        priority: i64,
    ) -> StorageResult<usize> {
        let policy = self.settings.retry;
        let mut matched = 0;

        for chunk in keys.chunks(KEYS_PER_STATEMENT) {
            let placeholders: Vec<String> =
                (0..chunk.len()).map(|i| format!("?{}", i + 3)).collect();
            let sql = format!(
                "UPDATE tasks SET priority = ?1 WHERE kind = ?2 AND key IN ({})",
                placeholders.join(", ")
            );

            let mut values = vec![
                Value::Integer(priority),
                Value::Text(kind.to_db_string().to_string()),
            ];
            values.extend(chunk.iter().map(|key| Value::Text(key.clone())));

            matched += policy.run("reprioritize", || {
                Ok(self.conn.execute(&sql, params_from_iter(values.iter()))?)
            })?;
        }

        if matched == 0 {
            tracing::warn!(
                "Unable to set priority for {} {:?}: no matching task",
                kind,
                keys
            );
        }
        Ok(matched)
    }

    fn get_task(&self, task_id: i64) -> StorageResult<Option<Task>> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![task_id], task_from_row)
            .optional()?)
    }

    fn find_task(&self, kind: TaskKind, key: &str) -> StorageResult<Option<Task>> {
        let sql = format!("SELECT {} FROM tasks WHERE kind = ?1 AND key = ?2", TASK_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![kind.to_db_string(), key], task_from_row)
            .optional()?)
    }

    fn count_tasks(&self, kind: TaskKind, state: LeaseState) -> StorageResult<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM tasks WHERE kind = ?1 AND {}",
            lease_clause(state, "leased_at", "completed_at")
        );
        self.count(&sql, vec![Value::Text(kind.to_db_string().to_string())])
    }

    fn count_failed_tasks(&self) -> StorageResult<u64> {
        self.count(
            "SELECT COUNT(*) FROM tasks WHERE completed_at IS NOT NULL
             AND (error_status IS NOT NULL OR error_message IS NOT NULL)",
            Vec::new(),
        )
    }
}

impl RecordStore for SqliteStorage {
    fn upsert(&mut self, drafts: &[CatalogRecordDraft]) -> StorageResult<InsertSummary> {
        let now = self.now();
        let mut rows = Vec::with_capacity(drafts.len());
        for draft in drafts {
            rows.push((
                format!(
                    "{} v{} ({})",
                    draft.package_id, draft.version_code, draft.device_profile
                ),
                vec![
                    Value::Text(draft.package_id.clone()),
                    Value::Integer(draft.version_code),
                    Value::Text(draft.device_profile.clone()),
                    Value::Text(draft.creator.clone()),
                    draft.price_micros.into(),
                    Value::Text(serde_json::to_string(&draft.payload)?),
                    Value::Text(serde_json::to_string(&draft.cross_references)?),
                    Value::Integer(now),
                ],
            ));
        }

        let summary = self.insert_batch(
            "upsert",
            "INSERT INTO catalog_records (package_id, version_code, device_profile, creator,
             price_micros, payload, cross_references, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            &rows,
        )?;

        tracing::debug!(
            "Stored {} records ({} already known, {} failed)",
            summary.inserted,
            summary.duplicates,
            summary.failed
        );
        Ok(summary)
    }

    fn set_similar(&mut self, package_id: &str, similar_ids: &[String]) -> StorageResult<usize> {
        let similar = serde_json::to_string(similar_ids)?;
        let policy = self.settings.retry;

        let updated = policy.run("set-similar", || {
            Ok(self.conn.execute(
                "UPDATE catalog_records SET similar_to = ?1 WHERE package_id = ?2",
                params![similar, package_id],
            )?)
        })?;

        if updated == 0 {
            tracing::error!(
                "Unable to set similar packages for {}: entry not found",
                package_id
            );
        }
        Ok(updated)
    }

    fn claim_download(&mut self, filter: DownloadFilter) -> StorageResult<Option<CatalogRecord>> {
        let now = self.now();
        let free = || Condition::Eq("price_micros", Value::Integer(0));

        let pending = FindAndModify::new(Table::Records)
            .filter(Condition::IsNull("download_leased_at"))
            .filter(Condition::IsNull("download_completed_at"))
            .filter_if(filter.free_only, free())
            .sort(Order::Asc("id"))
            .set("download_leased_at", now);

        if let Some(record) = self.find_one_and_update(&pending, RECORD_COLUMNS, record_from_row)? {
            return Ok(Some(record));
        }

        let deadline =
            LeaseState::expiry_cutoff(now, duration_millis(self.settings.max_download_duration));
        let expired = FindAndModify::new(Table::Records)
            .filter(Condition::Before("download_leased_at", deadline))
            .filter(Condition::IsNull("download_completed_at"))
            .filter_if(filter.free_only, free())
            .sort(Order::Asc("download_leased_at"))
            .sort(Order::Asc("id"))
            .set("download_leased_at", now);

        let record = self.find_one_and_update(&expired, RECORD_COLUMNS, record_from_row)?;
        if let Some(record) = &record {
            tracing::info!(
                "Reclaimed expired download of {} v{}",
                record.package_id,
                record.version_code
            );
        }
        Ok(record)
    }

    fn complete_download(&mut self, record_id: i64) -> StorageResult<bool> {
        let now = self.now();
        let query = FindAndModify::new(Table::Records)
            .filter(Condition::Eq("id", Value::Integer(record_id)))
            .set("download_completed_at", now);

        let found = self
            .find_one_and_update(&query, "id", |row| row.get::<_, i64>(0))?
            .is_some();
        if !found {
            tracing::error!(
                "Unable to set record {} as downloaded: id not found",
                record_id
            );
        }
        Ok(found)
    }

    fn reset_download(&mut self, record_id: i64) -> StorageResult<bool> {
        let query = FindAndModify::new(Table::Records)
            .filter(Condition::Eq("id", Value::Integer(record_id)))
            .unset("download_leased_at")
            .unset("download_completed_at");

        let found = self
            .find_one_and_update(&query, "id", |row| row.get::<_, i64>(0))?
            .is_some();
        if !found {
            tracing::error!(
                "Unable to reset download of record {}: id not found",
                record_id
            );
        }
        Ok(found)
    }

    fn get_record(&self, record_id: i64) -> StorageResult<Option<CatalogRecord>> {
        let sql = format!("SELECT {} FROM catalog_records WHERE id = ?1", RECORD_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![record_id], record_from_row)
            .optional()?)
    }

    fn find_records(&self, package_id: &str) -> StorageResult<Vec<CatalogRecord>> {
        let sql = format!(
            "SELECT {} FROM catalog_records WHERE package_id = ?1 ORDER BY id DESC",
            RECORD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![package_id], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn count_records(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM catalog_records", Vec::new())
    }

    fn count_downloads(&self, state: LeaseState) -> StorageResult<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM catalog_records WHERE {}",
            lease_clause(state, "download_leased_at", "download_completed_at")
        );
        self.count(&sql, Vec::new())
    }
}

impl RunStore for SqliteStorage {
    fn create_run(&mut self, kind: RunKind, config_hash: &str) -> StorageResult<i64> {
        let now = self.now();
        self.conn.execute(
            "INSERT INTO runs (kind, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                kind.to_db_string(),
                now,
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, kind, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, kind, started_at, finished_at, config_hash, status FROM runs
                 ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?)
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = self.now();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
                && (err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

fn lease_clause(state: LeaseState, leased: &str, completed: &str) -> String {
    match state {
        LeaseState::Pending => format!("{} IS NULL AND {} IS NULL", leased, completed),
        LeaseState::Leased => format!("{} IS NOT NULL AND {} IS NULL", leased, completed),
        LeaseState::Done => format!("{} IS NOT NULL", completed),
    }
}

fn conversion_error(
    column: usize,
    source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, source.into())
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let kind: String = row.get(1)?;
    let kind = TaskKind::from_db_string(&kind)
        .ok_or_else(|| conversion_error(1, format!("unknown task kind '{}'", kind)))?;

    let error_status: Option<i64> = row.get(7)?;
    let error_message: Option<String> = row.get(8)?;
    let error = match (error_status, error_message) {
        (None, None) => None,
        (status, message) => Some(TaskFailure {
            status: status.and_then(|s| u16::try_from(s).ok()),
            message: message.unwrap_or_default(),
        }),
    };

    Ok(Task {
        id: row.get(0)?,
        kind,
        key: row.get(2)?,
        priority: row.get(3)?,
        created_at: row.get(4)?,
        leased_at: row.get(5)?,
        completed_at: row.get(6)?,
        error,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogRecord> {
    let payload: String = row.get(6)?;
    let cross_references: String = row.get(7)?;
    let similar_to: Option<String> = row.get(8)?;

    Ok(CatalogRecord {
        id: row.get(0)?,
        package_id: row.get(1)?,
        version_code: row.get(2)?,
        device_profile: row.get(3)?,
        creator: row.get(4)?,
        price_micros: row.get(5)?,
        payload: serde_json::from_str(&payload).map_err(|e| conversion_error(6, e))?,
        cross_references: serde_json::from_str(&cross_references)
            .map_err(|e| conversion_error(7, e))?,
        similar_to: similar_to
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| conversion_error(8, e))?,
        discovered_at: row.get(9)?,
        download_leased_at: row.get(10)?,
        download_completed_at: row.get(11)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let kind: String = row.get(1)?;
    let status: String = row.get(5)?;
    Ok(RunRecord {
        id: row.get(0)?,
        kind: RunKind::from_db_string(&kind)
            .ok_or_else(|| conversion_error(1, format!("unknown run kind '{}'", kind)))?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        config_hash: row.get(4)?,
        status: RunStatus::from_db_string(&status).unwrap_or(RunStatus::Running),
    })
}
