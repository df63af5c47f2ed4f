//! Download driver - fetches binaries for stored records
//!
//! The pool claims records through the record store's download lease, writes
//! each binary to `{output_dir}/{package}##{version}##{record}.apk` through a
//! temporary file, and stops claiming while the output directory is at or
//! above its size cap.

use crate::catalog::{CatalogClient, CatalogResult};
use crate::config::DownloadConfig;
use crate::crawler::driver::LoopOutcome;
use crate::crawler::files::{dir_size, record_file_name, write_atomically};
use crate::crawler::SharedStorage;
use crate::storage::{CatalogRecord, DownloadFilter, RecordStore, SqliteStorage};
use crate::RippleError;
use std::path::PathBuf;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Download pool settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    pub output_dir: PathBuf,
    pub max_dir_bytes: u64,
    pub filter: DownloadFilter,
    /// Wait between size checks while the directory is full
    pub poll_interval: Duration,
    /// Wait before retrying a failed file write
    pub write_retry_delay: Duration,
}

impl DownloadSettings {
    pub fn from_config(config: &DownloadConfig) -> Self {
        Self {
            output_dir: PathBuf::from(&config.output_dir),
            max_dir_bytes: config.max_dir_bytes(),
            filter: DownloadFilter {
                free_only: config.free_only,
            },
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            write_retry_delay: Duration::from_millis(config.write_retry_delay_ms),
        }
    }
}

/// Summary of one download driver run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub outcome: LoopOutcome,
    pub downloaded: usize,
    /// Records the catalog had no binary for; left leased until expiry
    pub skipped: usize,
    /// Records the catalog refused permanently; marked downloaded
    pub unavailable: usize,
}

/// Worker loop over the download lease queue
pub struct DownloadDriver<C: CatalogClient + ?Sized> {
    storage: SharedStorage,
    catalog: Arc<C>,
    settings: DownloadSettings,
    cancel: CancellationToken,
}

impl<C: CatalogClient + ?Sized> DownloadDriver<C> {
    pub fn new(
        storage: SharedStorage,
        catalog: Arc<C>,
        settings: DownloadSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            storage,
            catalog,
            settings,
            cancel,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SqliteStorage> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs until no record is left to claim, cancellation, or a fatal error
    pub async fn run(&self) -> Result<DownloadReport, RippleError> {
        let mut report = DownloadReport::default();
        tokio::fs::create_dir_all(&self.settings.output_dir).await?;

        loop {
            if self.cancel.is_cancelled() {
                report.outcome = LoopOutcome::Cancelled;
                break;
            }

            let used = dir_size(&self.settings.output_dir)?;
            if used >= self.settings.max_dir_bytes {
                tracing::debug!(
                    "Output directory holds {} bytes (cap {}); waiting",
                    used,
                    self.settings.max_dir_bytes
                );
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        report.outcome = LoopOutcome::Cancelled;
                        break;
                    }
                    _ = tokio::time::sleep(self.settings.poll_interval) => continue,
                }
            }

            let record = match self.lock().claim_download(self.settings.filter)? {
                Some(record) => record,
                None => {
                    tracing::info!("No more records to download");
                    break;
                }
            };

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.download(&record) => Some(result),
            };

            match result {
                None => {
                    self.lock().reset_download(record.id)?;
                    tracing::info!(
                        "Interrupted while downloading {}; lease released",
                        record.package_id
                    );
                    report.outcome = LoopOutcome::Cancelled;
                    break;
                }
                Some(Ok(Some(path))) => {
                    self.lock().complete_download(record.id)?;
                    tracing::info!("Downloaded {} to {}", record.package_id, path.display());
                    report.downloaded += 1;
                }
                Some(Ok(None)) => {
                    tracing::warn!(
                        "No binary available for {} v{}; skipping",
                        record.package_id,
                        record.version_code
                    );
                    report.skipped += 1;
                }
                Some(Err(e)) if e.is_permanent() => {
                    tracing::warn!(
                        "Binary of {} v{} unavailable: {}",
                        record.package_id,
                        record.version_code,
                        e
                    );
                    self.lock().complete_download(record.id)?;
                    report.unavailable += 1;
                }
                Some(Err(e)) => {
                    tracing::error!("Download of {} failed: {}", record.package_id, e);
                    self.lock().reset_download(record.id)?;
                    return Err(e.into());
                }
            }
        }

        Ok(report)
    }

    /// Fetches and writes one binary; `None` when the catalog has none
    ///
    /// Write failures are retried until they succeed.
    async fn download(&self, record: &CatalogRecord) -> CatalogResult<Option<PathBuf>> {
        let Some(bytes) = self
            .catalog
            .fetch_binary(&record.package_id, record.version_code)
            .await?
        else {
            return Ok(None);
        };

        let path = self.settings.output_dir.join(record_file_name(
            &record.package_id,
            record.version_code,
            record.id,
        ));

        loop {
            match write_atomically(&path, &bytes).await {
                Ok(()) => return Ok(Some(path)),
                Err(e) => {
                    tracing::error!("Failed to write {}: {}; retrying", path.display(), e);
                    tokio::time::sleep(self.settings.write_retry_delay).await;
                }
            }
        }
    }
}
