//! Crawl driver - the claim / execute / persist worker loop
//!
//! Each driver repeatedly:
//! 1. Claims the next task from the shared queue
//! 2. Dispatches it to the catalog by task kind
//! 3. Expands the result into records and follow-up tasks
//! 4. Persists the expansion and marks the task done
//!
//! Several drivers, in one process or many, can run against the same
//! database; the store's atomic claim is the only coordination between them.

use crate::catalog::{CatalogClient, CatalogError, CatalogResult};
use crate::crawler::SharedStorage;
use crate::graph::{expand_details, expand_listing, Expansion};
use crate::state::TaskKind;
use crate::storage::{RecordStore, SqliteStorage, Task, TaskFailure, TaskStore};
use crate::RippleError;
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Why a driver loop stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopOutcome {
    /// No task or record was left to claim
    #[default]
    Exhausted,
    /// Cancellation was requested; any held lease was released
    Cancelled,
}

/// Summary of one crawl driver run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub outcome: LoopOutcome,
    /// Tasks completed without error
    pub completed: usize,
    /// Tasks completed with a recorded permanent error
    pub failed: usize,
}

/// Result of executing one task, not yet persisted
#[derive(Debug)]
struct Fetched {
    /// Package ids to record as similar to the task's package
    similar: Option<Vec<String>>,
    expansion: Expansion,
}

/// Worker loop over the crawl task queue
pub struct CrawlDriver<C: CatalogClient + ?Sized> {
    storage: SharedStorage,
    catalog: Arc<C>,
    device_profile: String,
    cancel: CancellationToken,
}

impl<C: CatalogClient + ?Sized> CrawlDriver<C> {
    pub fn new(
        storage: SharedStorage,
        catalog: Arc<C>,
        device_profile: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            storage,
            catalog,
            device_profile: device_profile.into(),
            cancel,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SqliteStorage> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs until the queue is exhausted, cancellation, or a fatal error
    ///
    /// Transient catalog failures that outlast the client's own retries are
    /// fatal: the task's lease is released and the error is returned.
    pub async fn run(&self) -> Result<CrawlReport, RippleError> {
        let mut report = CrawlReport::default();

        loop {
            if self.cancel.is_cancelled() {
                report.outcome = LoopOutcome::Cancelled;
                break;
            }

            let task = match self.lock().claim()? {
                Some(task) => task,
                None => {
                    tracing::info!("Task queue exhausted");
                    break;
                }
            };
            tracing::debug!("Claimed task {} ({} {})", task.id, task.kind, task.key);

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.execute(&task) => Some(result),
            };

            match result {
                None => {
                    self.lock().reset(task.id)?;
                    tracing::info!(
                        "Interrupted during {} {}; task returned to the queue",
                        task.kind,
                        task.key
                    );
                    report.outcome = LoopOutcome::Cancelled;
                    break;
                }
                Some(Ok(fetched)) => {
                    self.persist(&task, &fetched)?;
                    report.completed += 1;
                }
                Some(Err(e)) if e.is_permanent() => {
                    tracing::warn!("{} {} failed: {}", task.kind, task.key, e);
                    self.lock().complete(task.id, Some(&TaskFailure::from(&e)))?;
                    report.failed += 1;
                }
                Some(Err(e)) => {
                    tracing::error!("{} {} failed: {}", task.kind, task.key, e);
                    self.lock().reset(task.id)?;
                    return Err(e.into());
                }
            }

            let done = report.completed + report.failed;
            if done % 100 == 0 {
                tracing::info!(
                    "Progress: {} tasks done ({} with errors)",
                    done,
                    report.failed
                );
            }
        }

        Ok(report)
    }

    /// Calls the catalog for one task and expands the result
    async fn execute(&self, task: &Task) -> CatalogResult<Fetched> {
        match task.kind {
            TaskKind::Similar => {
                let entries = self.catalog.list_similar(&task.key).await?;
                Ok(Fetched {
                    similar: Some(entries.iter().map(|e| e.package_id.clone()).collect()),
                    expansion: expand_listing(&entries, &self.device_profile),
                })
            }
            TaskKind::Creator => {
                let entries = self.catalog.search(&task.key).await?;
                Ok(Fetched {
                    similar: None,
                    expansion: expand_listing(&entries, &self.device_profile),
                })
            }
            TaskKind::Details => {
                let details = self.catalog.fetch_details(&task.key).await?;
                if details.entry.package_id != task.key {
                    return Err(CatalogError::permanent(
                        None,
                        format!(
                            "details requested for {} but received {}",
                            task.key, details.entry.package_id
                        ),
                    ));
                }
                Ok(Fetched {
                    similar: None,
                    expansion: expand_details(&details, &self.device_profile),
                })
            }
        }
    }

    /// Stores an expansion and completes its task under one lock
    fn persist(&self, task: &Task, fetched: &Fetched) -> Result<(), RippleError> {
        let mut storage = self.lock();

        if let Some(similar) = &fetched.similar {
            storage.set_similar(&task.key, similar)?;
        }
        let records = storage.upsert(&fetched.expansion.records)?;
        let tasks = storage.enqueue(&fetched.expansion.tasks)?;
        storage.complete(task.id, None)?;

        tracing::debug!(
            "{} {}: {} new records, {} new tasks",
            task.kind,
            task.key,
            records.inserted,
            tasks.inserted
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::fake::{details, entry, FakeCatalog};
    use crate::state::LeaseState;
    use crate::storage::TaskDraft;
    use std::sync::Mutex;

    fn shared_storage() -> SharedStorage {
        Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()))
    }

    fn driver(storage: &SharedStorage, catalog: FakeCatalog) -> CrawlDriver<FakeCatalog> {
        CrawlDriver::new(
            storage.clone(),
            Arc::new(catalog),
            "bacon",
            CancellationToken::new(),
        )
    }

    fn enqueue(storage: &SharedStorage, drafts: &[TaskDraft]) {
        storage.lock().unwrap().enqueue(drafts).unwrap();
    }

    #[tokio::test]
    async fn test_empty_queue_exhausts_immediately() {
        let storage = shared_storage();
        let report = driver(&storage, FakeCatalog::default()).run().await.unwrap();

        assert_eq!(report, CrawlReport::default());
    }

    #[tokio::test]
    async fn test_details_task_expands() {
        let storage = shared_storage();
        enqueue(&storage, &[TaskDraft::new(TaskKind::Details, "com.a")]);

        let mut catalog = FakeCatalog::default();
        catalog
            .details
            .insert("com.a".into(), details("com.a", "Alpha", &["com.c"]));
        catalog
            .details
            .insert("com.c".into(), details("com.c", "Alpha", &["com.a"]));

        let report = driver(&storage, catalog).run().await.unwrap();

        assert_eq!(report.outcome, LoopOutcome::Exhausted);
        // com.a, the creator search, then com.c
        assert_eq!(report.completed, 3);

        let store = storage.lock().unwrap();
        assert_eq!(store.find_records("com.a").unwrap().len(), 1);
        assert_eq!(store.find_records("com.c").unwrap().len(), 1);
        let creator = store.find_task(TaskKind::Creator, "Alpha").unwrap().unwrap();
        assert_eq!(creator.state(), LeaseState::Done);
    }

    #[tokio::test]
    async fn test_similar_task_sets_back_links() {
        let storage = shared_storage();
        storage
            .lock()
            .unwrap()
            .upsert(&[crate::storage::CatalogRecordDraft::from_entry(
                &entry("com.a", "Alpha"),
                "bacon",
            )])
            .unwrap();
        enqueue(&storage, &[TaskDraft::new(TaskKind::Similar, "com.a")]);

        let mut catalog = FakeCatalog::default();
        catalog.similar.insert(
            "com.a".into(),
            vec![entry("com.b", "Beta"), entry("com.c", "Gamma")],
        );
        let catalog = Arc::new(catalog);

        let driver = CrawlDriver::new(
            storage.clone(),
            catalog.clone(),
            "bacon",
            CancellationToken::new(),
        );
        driver.run().await.unwrap();

        let store = storage.lock().unwrap();
        let record = &store.find_records("com.a").unwrap()[0];
        assert_eq!(
            record.similar_to,
            Some(vec!["com.b".to_string(), "com.c".to_string()])
        );
        assert_eq!(store.find_records("com.b").unwrap().len(), 1);
        assert!(store.find_task(TaskKind::Similar, "com.c").unwrap().is_some());
        assert!(store.find_task(TaskKind::Creator, "Beta").unwrap().is_some());
        assert!(catalog.calls().contains(&"search Gamma".to_string()));
    }

    #[tokio::test]
    async fn test_permanent_error_is_recorded() {
        let storage = shared_storage();
        enqueue(&storage, &[TaskDraft::new(TaskKind::Details, "com.gone")]);

        let report = driver(&storage, FakeCatalog::default()).run().await.unwrap();

        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, 1);

        let store = storage.lock().unwrap();
        let task = store.find_task(TaskKind::Details, "com.gone").unwrap().unwrap();
        assert_eq!(task.state(), LeaseState::Done);
        assert_eq!(
            task.error,
            Some(TaskFailure {
                status: Some(404),
                message: "Item not found".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_transient_error_releases_lease_and_stops() {
        let storage = shared_storage();
        enqueue(&storage, &[TaskDraft::new(TaskKind::Creator, "Alpha")]);

        let mut catalog = FakeCatalog::default();
        catalog
            .failures
            .insert("Alpha".into(), CatalogError::Transient("HTTP 503".into()));

        let result = driver(&storage, catalog).run().await;

        assert!(matches!(result, Err(RippleError::Catalog(_))));
        let store = storage.lock().unwrap();
        let task = store.find_task(TaskKind::Creator, "Alpha").unwrap().unwrap();
        assert_eq!(task.state(), LeaseState::Pending);
        assert_eq!(task.error, None);
    }

    #[tokio::test]
    async fn test_cancellation_resets_task() {
        let storage = shared_storage();
        enqueue(&storage, &[TaskDraft::new(TaskKind::Details, "com.slow")]);

        let mut catalog = FakeCatalog::default();
        catalog.stalled.insert("com.slow".into());

        let cancel = CancellationToken::new();
        let driver = CrawlDriver::new(storage.clone(), Arc::new(catalog), "bacon", cancel.clone());

        let handle = tokio::spawn(async move { driver.run().await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.outcome, LoopOutcome::Cancelled);

        let store = storage.lock().unwrap();
        let task = store.find_task(TaskKind::Details, "com.slow").unwrap().unwrap();
        assert_eq!(task.leased_at, None);
        assert_eq!(task.state(), LeaseState::Pending);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_claims_nothing() {
        let storage = shared_storage();
        enqueue(&storage, &[TaskDraft::new(TaskKind::Details, "com.a")]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let driver = CrawlDriver::new(
            storage.clone(),
            Arc::new(FakeCatalog::default()),
            "bacon",
            cancel,
        );

        let report = driver.run().await.unwrap();
        assert_eq!(report.outcome, LoopOutcome::Cancelled);
        assert_eq!(
            storage
                .lock()
                .unwrap()
                .count_tasks(TaskKind::Details, LeaseState::Pending)
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_higher_priority_runs_first() {
        let storage = shared_storage();
        enqueue(
            &storage,
            &[
                TaskDraft::new(TaskKind::Details, "com.low"),
                TaskDraft::new(TaskKind::Details, "com.high").with_priority(10),
            ],
        );

        let catalog = Arc::new(FakeCatalog::default());
        let driver = CrawlDriver::new(
            storage.clone(),
            catalog.clone(),
            "bacon",
            CancellationToken::new(),
        );
        driver.run().await.unwrap();

        assert_eq!(
            catalog.calls(),
            vec!["details com.high".to_string(), "details com.low".to_string()]
        );
    }
}
