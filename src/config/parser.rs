use crate::config::types::Config;
use crate::config::validation::{validate, validate_download_config};
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use store_ripple::config::load_config;
///
/// let config = load_config(Path::new("config.toml")).unwrap();
/// println!("Database: {}", config.store.database_path);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    // Read the configuration file
    let content = std::fs::read_to_string(path)?;

    // Parse TOML
    let config: Config = toml::from_str(&content)?;

    // Validate the configuration
    validate(&config)?;

    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Each run records this hash, so runs made with different settings can be
/// told apart.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok((Config, String))` - Successfully loaded configuration and its hash
/// * `Err(ConfigError)` - Failed to load or parse the configuration
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

/// Command-line overrides for the `[download]` section
#[derive(Debug, Clone, Default)]
pub struct DownloadOverrides {
    pub output_dir: Option<String>,
    pub max_dir_size_mb: Option<u64>,
    /// Lifts the free-only restriction
    pub include_paid: bool,
}

impl DownloadOverrides {
    /// Applies the overrides and re-validates the download section
    pub fn apply(&self, config: &mut Config) -> Result<(), ConfigError> {
        if let Some(dir) = &self.output_dir {
            config.download.output_dir = dir.clone();
        }
        if let Some(size) = self.max_dir_size_mb {
            config.download.max_dir_size_mb = size;
        }
        if self.include_paid {
            config.download.free_only = false;
        }
        validate_download_config(&config.download)
    }
}
