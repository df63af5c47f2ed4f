//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - The crawl task queue (claim / complete / reset / reprioritize)
//! - Deduplicated catalog records and their download leases
//! - Run tracking
//!
//! Every cross-worker interaction goes through
//! [`SqliteStorage::find_one_and_update`], which selects and updates a single
//! row inside one immediate transaction.

mod query;
mod retry;
mod schema;
mod sqlite;
mod traits;

pub use query::{Assignment, Condition, FindAndModify, Order, Table};
pub use retry::RetryPolicy;
pub use sqlite::{SqliteStorage, StoreSettings};
pub use traits::{RecordStore, RunStore, Storage, StorageError, StorageResult, TaskStore};

use crate::catalog::{AppDetails, ListingEntry};
use crate::state::{LeaseState, TaskKind};
use crate::RippleError;
use serde::{Deserialize, Serialize};

use std::path::Path;

/// Initializes or opens a storage database with default settings
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
pub fn open_storage(path: &Path) -> Result<SqliteStorage, RippleError> {
    SqliteStorage::new(path)
}

/// A crawl task as stored in the queue
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: i64,
    pub kind: TaskKind,
    pub key: String,
    pub priority: i64,
    pub created_at: i64,
    pub leased_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub error: Option<TaskFailure>,
}

impl Task {
    pub fn state(&self) -> LeaseState {
        LeaseState::from_timestamps(self.leased_at, self.completed_at)
    }
}

/// A task that has not been inserted yet
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskDraft {
    pub kind: TaskKind,
    pub key: String,
    pub priority: i64,
}

impl TaskDraft {
    pub fn new(kind: TaskKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

/// Error recorded on a task that finished unsuccessfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Catalog status code, when the failure came from an HTTP response
    pub status: Option<u16>,
    pub message: String,
}

/// Cross-reference lists attached to a details result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReferences {
    #[serde(default)]
    pub similar: Vec<String>,
    #[serde(default)]
    pub pre_install: Vec<String>,
    #[serde(default)]
    pub post_install: Vec<String>,
}

impl CrossReferences {
    /// All referenced package ids in similar, pre-install, post-install order
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.similar
            .iter()
            .chain(&self.pre_install)
            .chain(&self.post_install)
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.similar.is_empty() && self.pre_install.is_empty() && self.post_install.is_empty()
    }
}

/// A catalog entry waiting to be inserted
///
/// Identity is `(package_id, version_code, device_profile)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecordDraft {
    pub package_id: String,
    pub version_code: i64,
    pub device_profile: String,
    pub creator: String,
    pub price_micros: Option<i64>,
    pub payload: serde_json::Value,
    pub cross_references: CrossReferences,
}

impl CatalogRecordDraft {
    /// Builds a draft from a listing entry, without cross-references
    pub fn from_entry(entry: &ListingEntry, device_profile: &str) -> Self {
        Self {
            package_id: entry.package_id.clone(),
            version_code: entry.version_code,
            device_profile: device_profile.to_string(),
            creator: entry.creator.clone(),
            price_micros: entry.price_micros,
            payload: entry.payload.clone(),
            cross_references: CrossReferences::default(),
        }
    }

    /// Builds a draft from a details result, carrying its cross-references
    pub fn from_details(details: &AppDetails, device_profile: &str) -> Self {
        let mut draft = Self::from_entry(&details.entry, device_profile);
        draft.cross_references = CrossReferences {
            similar: details.similar.clone(),
            pre_install: details.pre_install.clone(),
            post_install: details.post_install.clone(),
        };
        draft
    }
}

/// A stored catalog entry
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    pub id: i64,
    pub package_id: String,
    pub version_code: i64,
    pub device_profile: String,
    pub creator: String,
    pub price_micros: Option<i64>,
    pub payload: serde_json::Value,
    pub cross_references: CrossReferences,
    pub similar_to: Option<Vec<String>>,
    pub discovered_at: i64,
    pub download_leased_at: Option<i64>,
    pub download_completed_at: Option<i64>,
}

impl CatalogRecord {
    pub fn download_state(&self) -> LeaseState {
        LeaseState::from_timestamps(self.download_leased_at, self.download_completed_at)
    }

    pub fn is_free(&self) -> bool {
        self.price_micros == Some(0)
    }
}

/// Restricts which records a download claim may pick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadFilter {
    /// Only claim records whose price is zero
    pub free_only: bool,
}

/// Outcome of a bulk insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub inserted: usize,
    /// Drafts dropped because their identity already existed
    pub duplicates: usize,
    /// Drafts rejected for any other reason (logged, not fatal)
    pub failed: usize,
}

/// Which driver a run belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Seed,
    Crawl,
    Download,
    Prioritize,
}

impl RunKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Crawl => "crawl",
            Self::Download => "download",
            Self::Prioritize => "prioritize",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "seed" => Some(Self::Seed),
            "crawl" => Some(Self::Crawl),
            "download" => Some(Self::Download),
            "prioritize" => Some(Self::Prioritize),
            _ => None,
        }
    }
}

/// Represents a driver run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub kind: RunKind,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a driver run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_roundtrip() {
        for status in &[
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Interrupted,
            RunStatus::Failed,
        ] {
            let db_str = status.to_db_string();
            let parsed = RunStatus::from_db_string(db_str);
            assert_eq!(Some(*status), parsed);
        }
    }

    #[test]
    fn test_run_status_invalid() {
        assert_eq!(RunStatus::from_db_string("invalid"), None);
        assert_eq!(RunKind::from_db_string("invalid"), None);
    }

    #[test]
    fn test_cross_references_order() {
        let refs = CrossReferences {
            similar: vec!["a".into(), "b".into()],
            pre_install: vec!["c".into()],
            post_install: vec!["d".into()],
        };
        let all: Vec<&str> = refs.all().collect();
        assert_eq!(all, vec!["a", "b", "c", "d"]);
        assert!(!refs.is_empty());
        assert!(CrossReferences::default().is_empty());
    }

    #[test]
    fn test_draft_from_details_keeps_cross_references() {
        let details = AppDetails {
            entry: ListingEntry {
                package_id: "com.example.app".into(),
                creator: "Example Inc".into(),
                version_code: 42,
                price_micros: Some(0),
                payload: serde_json::json!({"title": "Example"}),
            },
            similar: vec!["com.other".into()],
            pre_install: vec![],
            post_install: vec!["com.after".into()],
        };

        let draft = CatalogRecordDraft::from_details(&details, "bacon");

        assert_eq!(draft.device_profile, "bacon");
        assert_eq!(draft.version_code, 42);
        assert_eq!(draft.cross_references.similar, vec!["com.other"]);
        assert_eq!(draft.cross_references.post_install, vec!["com.after"]);
    }
}
