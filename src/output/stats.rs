//! Statistics generation from the crawl database
//!
//! This module provides functionality for extracting and displaying
//! queue, record and download progress from the storage layer.

use crate::state::{LeaseState, TaskKind};
use crate::storage::{RunRecord, Storage};
use crate::RippleError;
use chrono::{TimeZone, Utc};
use std::collections::BTreeMap;

/// Crawl statistics summary
#[derive(Debug, Clone, Default)]
pub struct CrawlStatistics {
    /// Task counts per kind, then per lease state
    pub tasks: BTreeMap<TaskKind, [u64; 3]>,

    /// Done tasks that carry an error
    pub failed_tasks: u64,

    /// Total number of stored catalog records
    pub total_records: u64,

    /// Record counts by download lease state
    pub downloads: [u64; 3],

    pub latest_run: Option<RunRecord>,
}

fn state_index(state: LeaseState) -> usize {
    match state {
        LeaseState::Pending => 0,
        LeaseState::Leased => 1,
        LeaseState::Done => 2,
    }
}

impl CrawlStatistics {
    /// Number of tasks of `kind` in `state`
    pub fn tasks_in(&self, kind: TaskKind, state: LeaseState) -> u64 {
        self.tasks
            .get(&kind)
            .map(|counts| counts[state_index(state)])
            .unwrap_or(0)
    }

    pub fn total_tasks(&self) -> u64 {
        self.tasks.values().flatten().sum()
    }

    /// Number of records whose binary is in `state`
    pub fn downloads_in(&self, state: LeaseState) -> u64 {
        self.downloads[state_index(state)]
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(RippleError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<CrawlStatistics, RippleError> {
    let mut stats = CrawlStatistics::default();

    for kind in TaskKind::all_kinds() {
        let mut counts = [0; 3];
        for state in LeaseState::all_states() {
            counts[state_index(state)] = storage.count_tasks(kind, state)?;
        }
        stats.tasks.insert(kind, counts);
    }

    for state in LeaseState::all_states() {
        stats.downloads[state_index(state)] = storage.count_downloads(state)?;
    }

    stats.failed_tasks = storage.count_failed_tasks()?;
    stats.total_records = storage.count_records()?;
    stats.latest_run = storage.get_latest_run()?;

    Ok(stats)
}

fn format_millis(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => millis.to_string(),
    }
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Tasks ({} total):", stats.total_tasks());
    println!("  {:<15} {:>10} {:>10} {:>10}", "kind", "pending", "leased", "done");
    for kind in stats.tasks.keys() {
        println!(
            "  {:<15} {:>10} {:>10} {:>10}",
            kind.to_db_string(),
            stats.tasks_in(*kind, LeaseState::Pending),
            stats.tasks_in(*kind, LeaseState::Leased),
            stats.tasks_in(*kind, LeaseState::Done)
        );
    }
    println!("  Finished with errors: {}", stats.failed_tasks);
    println!();

    println!("Records:");
    println!("  Total stored: {}", stats.total_records);
    println!(
        "  Binaries downloaded: {}",
        stats.downloads_in(LeaseState::Done)
    );
    println!(
        "  Downloads in progress: {}",
        stats.downloads_in(LeaseState::Leased)
    );
    println!(
        "  Awaiting download: {}",
        stats.downloads_in(LeaseState::Pending)
    );
    println!();

    if let Some(run) = &stats.latest_run {
        println!("Latest Run:");
        println!("  #{} {} ({})", run.id, run.kind.to_db_string(), run.status.to_db_string());
        println!("  Started: {}", format_millis(run.started_at));
        if let Some(finished_at) = run.finished_at {
            println!("  Finished: {}", format_millis(finished_at));
            let seconds = (finished_at - run.started_at).max(0) / 1000;
            println!("  Duration: {}s", seconds);
        }
        println!("  Config hash: {}", run.config_hash);
    } else {
        println!("No runs recorded yet");
    }
}
