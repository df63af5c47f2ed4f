//! Expansion rules for listings, details and seeds

use crate::catalog::{AppDetails, ListingEntry};
use crate::state::TaskKind;
use crate::storage::{CatalogRecordDraft, TaskDraft};

/// Records and tasks derived from one catalog result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expansion {
    pub records: Vec<CatalogRecordDraft>,
    pub tasks: Vec<TaskDraft>,
}

impl Expansion {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.tasks.is_empty()
    }

    /// Appends another expansion, keeping order
    pub fn merge(&mut self, other: Expansion) {
        self.records.extend(other.records);
        self.tasks.extend(other.tasks);
    }
}

/// Expands a bulk listing (chart, similar list, search result)
///
/// Every entry yields one record, one `CREATOR` task for its publisher and
/// one `SIMILAR` task for its package. Repeated publishers are not collapsed
/// here.
pub fn expand_listing(entries: &[ListingEntry], device_profile: &str) -> Expansion {
    let mut expansion = Expansion {
        records: Vec::with_capacity(entries.len()),
        tasks: Vec::with_capacity(entries.len() * 2),
    };

    for entry in entries {
        expansion
            .records
            .push(CatalogRecordDraft::from_entry(entry, device_profile));
        expansion
            .tasks
            .push(TaskDraft::new(TaskKind::Creator, entry.creator.as_str()));
        expansion
            .tasks
            .push(TaskDraft::new(TaskKind::Similar, entry.package_id.as_str()));
    }

    expansion
}

/// Expands a single details result
///
/// Yields one record carrying the cross-reference lists, one `CREATOR` task
/// for the publisher and one `DETAILS` task per cross-referenced package, in
/// similar, pre-install, post-install order.
pub fn expand_details(details: &AppDetails, device_profile: &str) -> Expansion {
    let record = CatalogRecordDraft::from_details(details, device_profile);

    let mut tasks = vec![TaskDraft::new(
        TaskKind::Creator,
        details.entry.creator.as_str(),
    )];
    tasks.extend(
        record
            .cross_references
            .all()
            .map(|package| TaskDraft::new(TaskKind::Details, package)),
    );

    Expansion {
        records: vec![record],
        tasks,
    }
}

/// `DETAILS` tasks for package ids found while walking the category tree
pub fn seed_tasks<'a>(package_ids: impl IntoIterator<Item = &'a str>) -> Vec<TaskDraft> {
    package_ids
        .into_iter()
        .map(|package| TaskDraft::new(TaskKind::Details, package))
        .collect()
}
