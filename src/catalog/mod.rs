//! Catalog client interface
//!
//! The crawler talks to the app catalog only through the [`CatalogClient`]
//! trait. Every call either succeeds, fails permanently (the item is gone,
//! forbidden or malformed and retrying will not help), or fails transiently
//! (network trouble, throttling, server errors).

mod http;
mod retry;

pub use http::{build_http_client, HttpCatalogClient};
pub use retry::BackoffPolicy;

use crate::storage::TaskFailure;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by catalog calls
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// Retrying will not help; recorded on the task
    #[error("permanent catalog error{}: {}", status_suffix(.status), .message)]
    Permanent {
        status: Option<u16>,
        message: String,
    },

    /// Network or throttling failure worth retrying later
    #[error("transient catalog error: {0}")]
    Transient(String),
}

impl CatalogError {
    pub fn permanent(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Permanent {
            status,
            message: message.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<&CatalogError> for TaskFailure {
    fn from(error: &CatalogError) -> Self {
        match error {
            CatalogError::Permanent { status, message } => TaskFailure {
                status: *status,
                message: message.clone(),
            },
            CatalogError::Transient(message) => TaskFailure {
                status: None,
                message: message.clone(),
            },
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

/// Result type for catalog calls
pub type CatalogResult<T> = Result<T, CatalogError>;

/// A top-level or nested catalog category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

/// A ranked list inside a category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub entries: Vec<ListingEntry>,
}

/// One app as it appears in a listing (chart, similar list, search result)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub package_id: String,
    pub creator: String,
    pub version_code: i64,
    /// Offer price in micros; `Some(0)` means free
    #[serde(default)]
    pub price_micros: Option<i64>,
    /// Remaining fields, kept verbatim
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Full details of a single app, with its cross-reference hints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDetails {
    pub entry: ListingEntry,
    #[serde(default)]
    pub similar: Vec<String>,
    #[serde(default)]
    pub pre_install: Vec<String>,
    #[serde(default)]
    pub post_install: Vec<String>,
}

/// Remote catalog operations the crawler depends on
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn list_categories(&self) -> CatalogResult<Vec<Category>>;

    /// Subcategories of a category; empty when the category is a leaf
    async fn list_subcategories(&self, category_id: &str) -> CatalogResult<Vec<Category>>;

    async fn list_charts(&self, category_id: &str) -> CatalogResult<Vec<Chart>>;

    async fn list_similar(&self, package_id: &str) -> CatalogResult<Vec<ListingEntry>>;

    /// Every app published by `creator`
    async fn search(&self, creator: &str) -> CatalogResult<Vec<ListingEntry>>;

    async fn fetch_details(&self, package_id: &str) -> CatalogResult<AppDetails>;

    /// Binary payload of one version; `None` when the catalog has nothing to serve
    async fn fetch_binary(
        &self,
        package_id: &str,
        version_code: i64,
    ) -> CatalogResult<Option<Vec<u8>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let gone = CatalogError::permanent(Some(404), "Item not found");
        assert!(gone.is_permanent());
        assert!(!gone.is_transient());
        assert_eq!(gone.to_string(), "permanent catalog error (404): Item not found");

        let blip = CatalogError::Transient("connection reset".into());
        assert!(blip.is_transient());
        assert_eq!(blip.to_string(), "transient catalog error: connection reset");
    }

    #[test]
    fn test_task_failure_from_error() {
        let failure = TaskFailure::from(&CatalogError::permanent(Some(403), "Forbidden"));
        assert_eq!(failure.status, Some(403));
        assert_eq!(failure.message, "Forbidden");
    }

    #[test]
    fn test_permanent_without_status() {
        let err = CatalogError::permanent(None, "malformed response");
        assert_eq!(err.to_string(), "permanent catalog error: malformed response");
    }

    #[test]
    fn test_details_deserialize_with_defaults() {
        let details: AppDetails = serde_json::from_str(
            r#"{"entry": {"package_id": "com.a", "creator": "Dev", "version_code": 3}}"#,
        )
        .unwrap();

        assert_eq!(details.entry.price_micros, None);
        assert!(details.entry.payload.is_null());
        assert!(details.similar.is_empty());
    }
}
