use serde::Deserialize;

/// Main configuration structure for Store-Ripple
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub crawler: CrawlerConfig,
    pub catalog: CatalogConfig,
    pub download: DownloadConfig,
}

/// Persistent store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file shared by all workers
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Attempts for an operation that hits lock contention
    #[serde(rename = "retry-attempts", default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Delay between those attempts (milliseconds)
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

/// Crawl behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Emulated device recorded on every catalog record
    #[serde(rename = "device-profile")]
    pub device_profile: String,

    /// A leased task older than this is reclaimed by another worker
    #[serde(
        rename = "max-task-duration-seconds",
        default = "default_max_task_duration_seconds"
    )]
    pub max_task_duration_seconds: u64,

    /// How chart entries are turned into work when seeding
    #[serde(rename = "seed-mode", default)]
    pub seed_mode: SeedMode,

    /// Priority given by `prioritize` when none is passed
    #[serde(rename = "default-priority-bump", default = "default_priority_bump")]
    pub default_priority_bump: i64,
}

/// Seeding strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedMode {
    /// Chart entries become `DETAILS` tasks only
    #[default]
    Fast,
    /// Chart entries are stored and expanded like any other listing
    Thorough,
}

/// Catalog gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Base URL of the JSON catalog gateway
    #[serde(rename = "base-url")]
    pub base_url: String,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout
    #[serde(rename = "timeout-seconds", default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Retries of a transient catalog failure
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay (milliseconds), doubled per retry
    #[serde(rename = "retry-backoff-ms", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(rename = "http-proxy", default)]
    pub http_proxy: Option<String>,

    #[serde(rename = "https-proxy", default)]
    pub https_proxy: Option<String>,
}

/// Binary download configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    /// Directory that receives the binaries
    #[serde(rename = "output-dir")]
    pub output_dir: String,

    /// Size cap of the output directory, in megabytes of 1000*1000 bytes
    #[serde(rename = "max-dir-size-mb")]
    pub max_dir_size_mb: u64,

    #[serde(
        rename = "max-download-duration-seconds",
        default = "default_max_download_duration_seconds"
    )]
    pub max_download_duration_seconds: u64,

    /// Only download apps whose price is zero
    #[serde(rename = "free-only", default = "default_free_only")]
    pub free_only: bool,

    /// How often a full directory is re-measured (milliseconds)
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pause before retrying a failed file write (milliseconds)
    #[serde(rename = "write-retry-delay-ms", default = "default_write_retry_delay_ms")]
    pub write_retry_delay_ms: u64,
}

impl DownloadConfig {
    pub fn max_dir_bytes(&self) -> u64 {
        self.max_dir_size_mb.saturating_mul(1000 * 1000)
    }
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_task_duration_seconds() -> u64 {
    600
}

fn default_priority_bump() -> i64 {
    10
}

fn default_user_agent() -> String {
    format!("store-ripple/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_download_duration_seconds() -> u64 {
    1800
}

fn default_free_only() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_write_retry_delay_ms() -> u64 {
    1000
}
