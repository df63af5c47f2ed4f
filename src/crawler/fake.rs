//! In-memory catalog used by the driver tests

use crate::catalog::{
    AppDetails, CatalogClient, CatalogError, CatalogResult, Category, Chart, ListingEntry,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub(crate) fn entry(package: &str, creator: &str) -> ListingEntry {
    ListingEntry {
        package_id: package.to_string(),
        creator: creator.to_string(),
        version_code: 1,
        price_micros: Some(0),
        payload: json!({ "title": package }),
    }
}

pub(crate) fn details(package: &str, creator: &str, similar: &[&str]) -> AppDetails {
    AppDetails {
        entry: entry(package, creator),
        similar: similar.iter().map(|s| s.to_string()).collect(),
        pre_install: Vec::new(),
        post_install: Vec::new(),
    }
}

#[derive(Default)]
pub(crate) struct FakeCatalog {
    pub categories: Vec<Category>,
    pub subcategories: HashMap<String, Vec<Category>>,
    pub charts: HashMap<String, Vec<Chart>>,
    pub similar: HashMap<String, Vec<ListingEntry>>,
    pub creators: HashMap<String, Vec<ListingEntry>>,
    pub details: HashMap<String, AppDetails>,
    pub binaries: HashMap<String, Vec<u8>>,
    /// Errors returned for a package, creator or category id
    pub failures: HashMap<String, CatalogError>,
    /// Keys whose calls never return
    pub stalled: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeCatalog {
    async fn enter(&self, call: &str, key: &str) -> CatalogResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", call, key));

        if self.stalled.contains(key) {
            std::future::pending::<()>().await;
        }
        match self.failures.get(key) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn list_categories(&self) -> CatalogResult<Vec<Category>> {
        self.enter("categories", "").await?;
        Ok(self.categories.clone())
    }

    async fn list_subcategories(&self, category_id: &str) -> CatalogResult<Vec<Category>> {
        self.enter("subcategories", category_id).await?;
        Ok(self
            .subcategories
            .get(category_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_charts(&self, category_id: &str) -> CatalogResult<Vec<Chart>> {
        self.enter("charts", category_id).await?;
        Ok(self.charts.get(category_id).cloned().unwrap_or_default())
    }

    async fn list_similar(&self, package_id: &str) -> CatalogResult<Vec<ListingEntry>> {
        self.enter("similar", package_id).await?;
        Ok(self.similar.get(package_id).cloned().unwrap_or_default())
    }

    async fn search(&self, creator: &str) -> CatalogResult<Vec<ListingEntry>> {
        self.enter("search", creator).await?;
        Ok(self.creators.get(creator).cloned().unwrap_or_default())
    }

    async fn fetch_details(&self, package_id: &str) -> CatalogResult<AppDetails> {
        self.enter("details", package_id).await?;
        self.details
            .get(package_id)
            .cloned()
            .ok_or_else(|| CatalogError::permanent(Some(404), "Item not found"))
    }

    async fn fetch_binary(
        &self,
        package_id: &str,
        _version_code: i64,
    ) -> CatalogResult<Option<Vec<u8>>> {
        self.enter("binary", package_id).await?;
        Ok(self.binaries.get(package_id).cloned())
    }
}
