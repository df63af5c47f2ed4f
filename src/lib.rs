//! Store-Ripple: a lease-based app catalog crawler
//!
//! This crate walks an app catalog outward from its category charts, following
//! similarity, shared-publisher and cross-reference edges. Work is kept in a
//! persistent SQLite queue so any number of worker processes can claim tasks
//! concurrently, and discovered apps are stored once per
//! (package, version, device) identity.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod crawler;
pub mod graph;
pub mod output;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Store-Ripple operations
#[derive(Debug, Error)]
pub enum RippleError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] catalog::CatalogError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Store-Ripple operations
pub type Result<T> = std::result::Result<T, RippleError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use catalog::{CatalogClient, CatalogError};
pub use config::Config;
pub use state::{LeaseState, TaskKind};
pub use storage::{RecordStore, SqliteStorage, TaskStore};
