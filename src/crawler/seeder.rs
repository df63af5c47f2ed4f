//! Initial seeding walk over the category tree
//!
//! Categories → subcategories (or the category itself when it has none) →
//! charts. Each chart is persisted as soon as it is fetched, so an
//! interrupted walk keeps what it found and a repeated walk only adds
//! duplicates the store drops.

use crate::catalog::{CatalogClient, CatalogResult, Category, Chart};
use crate::config::SeedMode;
use crate::crawler::SharedStorage;
use crate::graph::{expand_listing, seed_tasks};
use crate::storage::{RecordStore, SqliteStorage, TaskStore};
use crate::RippleError;
use std::future::Future;
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Summary of a seeding walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Leaf categories whose charts were read
    pub categories: usize,
    pub charts: usize,
    pub entries: usize,
    pub tasks_enqueued: usize,
    pub records_inserted: usize,
    /// Leaves skipped because the catalog refused them
    pub skipped: usize,
    pub cancelled: bool,
}

/// Walks the catalog's category tree and enqueues the apps it lists
pub struct Seeder<C: CatalogClient + ?Sized> {
    storage: SharedStorage,
    catalog: Arc<C>,
    device_profile: String,
    mode: SeedMode,
    cancel: CancellationToken,
}

impl<C: CatalogClient + ?Sized> Seeder<C> {
    pub fn new(
        storage: SharedStorage,
        catalog: Arc<C>,
        device_profile: impl Into<String>,
        mode: SeedMode,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            storage,
            catalog,
            device_profile: device_profile.into(),
            mode,
            cancel,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SqliteStorage> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Awaits a catalog call unless cancellation comes first
    async fn call<T>(&self, call: impl Future<Output = CatalogResult<T>>) -> Option<CatalogResult<T>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = call => Some(result),
        }
    }

    /// Runs the full walk
    ///
    /// A permanent error on one category or chart list is logged and the
    /// walk moves on; a transient error stops it.
    pub async fn run(&self) -> Result<SeedReport, RippleError> {
        let mut report = SeedReport::default();

        let Some(categories) = self.call(self.catalog.list_categories()).await else {
            report.cancelled = true;
            return Ok(report);
        };
        let categories = categories?;
        tracing::info!("Seeding from {} categories ({:?} mode)", categories.len(), self.mode);

        for category in &categories {
            let Some(leaves) = self.leaves(category).await? else {
                report.cancelled = true;
                break;
            };

            for leaf in &leaves {
                let Some(charts) = self.call(self.catalog.list_charts(&leaf.id)).await else {
                    report.cancelled = true;
                    return Ok(report);
                };

                let charts = match charts {
                    Ok(charts) => charts,
                    Err(e) if e.is_permanent() => {
                        tracing::warn!("Skipping category {}: {}", leaf.id, e);
                        report.skipped += 1;
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

                report.categories += 1;
                for chart in &charts {
                    self.persist_chart(chart, &mut report)?;
                }
                tracing::debug!("Category {}: {} charts", leaf.id, charts.len());
            }
        }

        tracing::info!(
            "Seeding finished: {} charts, {} entries, {} new tasks, {} new records",
            report.charts,
            report.entries,
            report.tasks_enqueued,
            report.records_inserted
        );
        Ok(report)
    }

    /// Subcategories of `category`, or the category itself when it has none
    ///
    /// Returns `None` when cancelled.
    async fn leaves(&self, category: &Category) -> Result<Option<Vec<Category>>, RippleError> {
        let Some(result) = self
            .call(self.catalog.list_subcategories(&category.id))
            .await
        else {
            return Ok(None);
        };

        match result {
            Ok(subcategories) if subcategories.is_empty() => Ok(Some(vec![category.clone()])),
            Ok(subcategories) => Ok(Some(subcategories)),
            Err(e) if e.is_permanent() => {
                tracing::warn!(
                    "No subcategories for {} ({}); using the category itself",
                    category.id,
                    e
                );
                Ok(Some(vec![category.clone()]))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn persist_chart(&self, chart: &Chart, report: &mut SeedReport) -> Result<(), RippleError> {
        let mut storage = self.lock();

        match self.mode {
            SeedMode::Fast => {
                let tasks = seed_tasks(chart.entries.iter().map(|e| e.package_id.as_str()));
                report.tasks_enqueued += storage.enqueue(&tasks)?.inserted;
            }
            SeedMode::Thorough => {
                let expansion = expand_listing(&chart.entries, &self.device_profile);
                report.records_inserted += storage.upsert(&expansion.records)?.inserted;
                report.tasks_enqueued += storage.enqueue(&expansion.tasks)?.inserted;
            }
        }

        report.charts += 1;
        report.entries += chart.entries.len();
        Ok(())
    }
}
