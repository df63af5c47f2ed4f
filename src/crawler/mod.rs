//! Crawler module for catalog walking and binary downloads
//!
//! This module contains the worker loops, including:
//! - The seeding walk over the category tree
//! - The crawl driver that drains the task queue
//! - The download pool that fetches binaries for stored records
//!
//! The functions at this level open the store, record a run around the work,
//! and translate the driver's outcome into the run's final status.

mod downloader;
mod driver;
mod files;
mod seeder;

#[cfg(test)]
pub(crate) mod fake;

pub use downloader::{DownloadDriver, DownloadReport, DownloadSettings};
pub use driver::{CrawlDriver, CrawlReport, LoopOutcome};
pub use files::{dir_size, record_file_name, sanitize_filename, write_atomically};
pub use seeder::{SeedReport, Seeder};

use crate::catalog::CatalogClient;
use crate::config::Config;
use crate::state::TaskKind;
use crate::storage::{RunKind, RunStatus, RunStore, SqliteStorage, StoreSettings, TaskStore};
use crate::RippleError;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Store handle shared by the drivers of one worker
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Opens the configured database as a shared handle
pub fn open_shared_storage(config: &Config) -> Result<SharedStorage, RippleError> {
    let storage = SqliteStorage::open(
        Path::new(&config.store.database_path),
        StoreSettings::from_config(config),
    )?;
    Ok(Arc::new(Mutex::new(storage)))
}

fn lock(storage: &SharedStorage) -> MutexGuard<'_, SqliteStorage> {
    storage.lock().unwrap_or_else(PoisonError::into_inner)
}

fn start_run(storage: &SharedStorage, kind: RunKind, config_hash: &str) -> Result<i64, RippleError> {
    let run_id = lock(storage).create_run(kind, config_hash)?;
    tracing::info!("Starting {} run {}", kind.to_db_string(), run_id);
    Ok(run_id)
}

fn finish_run<T>(
    storage: &SharedStorage,
    run_id: i64,
    result: &Result<T, RippleError>,
    cancelled: impl FnOnce(&T) -> bool,
) -> Result<(), RippleError> {
    let status = match result {
        Ok(value) if cancelled(value) => RunStatus::Interrupted,
        Ok(_) => RunStatus::Completed,
        Err(_) => RunStatus::Failed,
    };
    lock(storage).finish_run(run_id, status)?;
    tracing::info!("Run {} finished: {}", run_id, status.to_db_string());
    Ok(())
}

/// Walks the category tree and enqueues what it finds
///
/// # Arguments
///
/// * `config` - The loaded configuration
/// * `config_hash` - Hash of the configuration file, recorded on the run
/// * `catalog` - Catalog client to walk
/// * `cancel` - Stops the walk when cancelled
pub async fn seed(
    config: &Config,
    config_hash: &str,
    catalog: Arc<dyn CatalogClient>,
    cancel: CancellationToken,
) -> Result<SeedReport, RippleError> {
    let storage = open_shared_storage(config)?;
    let run_id = start_run(&storage, RunKind::Seed, config_hash)?;

    let seeder = Seeder::new(
        storage.clone(),
        catalog,
        config.crawler.device_profile.as_str(),
        config.crawler.seed_mode,
        cancel,
    );
    let result = seeder.run().await;

    finish_run(&storage, run_id, &result, |report| report.cancelled)?;
    result
}

/// Drains the task queue with `workers` concurrent drivers
///
/// Each driver gets its own database connection, so they coordinate only
/// through the store's claims, as separate processes would. If one driver
/// fails, the others are cancelled and release their leases.
pub async fn crawl(
    config: &Config,
    config_hash: &str,
    catalog: Arc<dyn CatalogClient>,
    workers: usize,
    cancel: CancellationToken,
) -> Result<CrawlReport, RippleError> {
    let storage = open_shared_storage(config)?;
    let run_id = start_run(&storage, RunKind::Crawl, config_hash)?;

    let mut connections = vec![storage.clone()];
    for _ in 1..workers.max(1) {
        match open_shared_storage(config) {
            Ok(connection) => connections.push(connection),
            Err(e) => {
                let result: Result<CrawlReport, RippleError> = Err(e);
                finish_run(&storage, run_id, &result, |_| false)?;
                return result;
            }
        }
    }

    let stop = cancel.child_token();
    let mut handles = Vec::with_capacity(connections.len());
    for worker_storage in connections {
        let driver = CrawlDriver::new(
            worker_storage,
            catalog.clone(),
            config.crawler.device_profile.as_str(),
            stop.clone(),
        );
        let stop = stop.clone();
        handles.push(tokio::spawn(async move {
            let result = driver.run().await;
            if result.is_err() {
                stop.cancel();
            }
            result
        }));
    }

    let mut total = CrawlReport::default();
    let mut failure = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(report)) => {
                total.completed += report.completed;
                total.failed += report.failed;
                if report.outcome == LoopOutcome::Cancelled {
                    total.outcome = LoopOutcome::Cancelled;
                }
            }
            Ok(Err(e)) => {
                failure.get_or_insert(e);
            }
            Err(e) => {
                failure.get_or_insert(RippleError::Storage(format!("crawl worker panicked: {}", e)));
            }
        }
    }

    let result = match failure {
        Some(e) => Err(e),
        None => Ok(total),
    };
    finish_run(&storage, run_id, &result, |report| {
        report.outcome == LoopOutcome::Cancelled
    })?;

    if let Ok(report) = &result {
        tracing::info!(
            "Crawl finished: {} tasks completed, {} with errors",
            report.completed,
            report.failed
        );
    }
    result
}

/// Downloads binaries for stored records until none is left
pub async fn download(
    config: &Config,
    config_hash: &str,
    catalog: Arc<dyn CatalogClient>,
    cancel: CancellationToken,
) -> Result<DownloadReport, RippleError> {
    let storage = open_shared_storage(config)?;
    let run_id = start_run(&storage, RunKind::Download, config_hash)?;

    let driver = DownloadDriver::new(
        storage.clone(),
        catalog,
        DownloadSettings::from_config(&config.download),
        cancel,
    );
    let result = driver.run().await;

    finish_run(&storage, run_id, &result, |report| {
        report.outcome == LoopOutcome::Cancelled
    })?;

    if let Ok(report) = &result {
        tracing::info!(
            "Downloads finished: {} written, {} without binary, {} unavailable",
            report.downloaded,
            report.skipped,
            report.unavailable
        );
    }
    result
}

/// Sets the priority of the given tasks; returns how many matched
pub fn prioritize(
    config: &Config,
    config_hash: &str,
    kind: TaskKind,
    keys: &[String],
    priority: i64,
) -> Result<usize, RippleError> {
    let storage = open_shared_storage(config)?;
    let run_id = start_run(&storage, RunKind::Prioritize, config_hash)?;

    let result = lock(&storage)
        .reprioritize(kind, keys, priority)
        .map_err(RippleError::from);

    finish_run(&storage, run_id, &result, |_| false)?;

    if let Ok(matched) = &result {
        tracing::info!(
            "Set priority {} on {} of {} {} tasks",
            priority,
            matched,
            keys.len(),
            kind
        );
    }
    result
}
