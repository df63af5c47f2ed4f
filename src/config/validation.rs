use crate::config::types::{CatalogConfig, Config, CrawlerConfig, DownloadConfig, StoreConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_store_config(&config.store)?;
    validate_crawler_config(&config.crawler)?;
    validate_catalog_config(&config.catalog)?;
    validate_download_config(&config.download)?;
    Ok(())
}

/// Validates store configuration
fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.retry_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "retry_attempts must be >= 1, got {}",
            config.retry_attempts
        )));
    }

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.device_profile.trim().is_empty() {
        return Err(ConfigError::Validation(
            "device_profile cannot be empty".to_string(),
        ));
    }

    if config.max_task_duration_seconds < 1 {
        return Err(ConfigError::Validation(format!(
            "max_task_duration_seconds must be >= 1, got {}",
            config.max_task_duration_seconds
        )));
    }

    Ok(())
}

/// Validates catalog configuration
fn validate_catalog_config(config: &CatalogConfig) -> Result<(), ConfigError> {
    validate_http_url("base_url", &config.base_url)?;

    if config.user_agent.is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_seconds < 1 {
        return Err(ConfigError::Validation(format!(
            "timeout_seconds must be >= 1, got {}",
            config.timeout_seconds
        )));
    }

    if let Some(proxy) = &config.http_proxy {
        validate_http_url("http_proxy", proxy)?;
    }
    if let Some(proxy) = &config.https_proxy {
        validate_http_url("https_proxy", proxy)?;
    }

    Ok(())
}

/// Validates download configuration
pub(crate) fn validate_download_config(config: &DownloadConfig) -> Result<(), ConfigError> {
    if config.output_dir.is_empty() {
        return Err(ConfigError::Validation(
            "output_dir cannot be empty".to_string(),
        ));
    }

    if config.max_dir_size_mb < 1 {
        return Err(ConfigError::Validation(format!(
            "max_dir_size_mb must be >= 1, got {}",
            config.max_dir_size_mb
        )));
    }

    if config.max_download_duration_seconds < 1 {
        return Err(ConfigError::Validation(format!(
            "max_download_duration_seconds must be >= 1, got {}",
            config.max_download_duration_seconds
        )));
    }

    if config.poll_interval_ms < 1 {
        return Err(ConfigError::Validation(format!(
            "poll_interval_ms must be >= 1, got {}",
            config.poll_interval_ms
        )));
    }

    Ok(())
}

/// Validates that a value is an absolute http(s) URL
fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must use the http or https scheme",
            field, value
        )));
    }

    Ok(())
}
