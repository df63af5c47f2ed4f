//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the catalog gateway and run the
//! seed, crawl and download commands end-to-end against a database file.

use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use store_ripple::catalog::{CatalogClient, HttpCatalogClient};
use store_ripple::config::{load_config_with_hash, Config};
use store_ripple::crawler::{self, LoopOutcome};
use store_ripple::output::load_statistics;
use store_ripple::storage::{RecordStore, RunKind, RunStatus, RunStore, SqliteStorage, TaskStore};
use store_ripple::{LeaseState, TaskKind};
use tempfile::{NamedTempFile, TempDir};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Writes a config pointing at the mock server and the temp directory
fn create_test_config(base_url: &str, dir: &Path) -> (NamedTempFile, Config, String) {
    let content = format!(
        r#"
[store]
database-path = '{db}'
retry-delay-ms = 10

[crawler]
device-profile = "bacon"

[catalog]
base-url = "{base_url}"
max-retries = 1
retry-backoff-ms = 10

[download]
output-dir = '{apks}'
max-dir-size-mb = 10
poll-interval-ms = 10
"#,
        db = dir.join("ripple.db").display(),
        apks = dir.join("apks").display(),
    );

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();

    let (config, hash) = load_config_with_hash(file.path()).unwrap();
    (file, config, hash)
}

fn listing(package: &str, creator: &str) -> serde_json::Value {
    json!({
        "package_id": package,
        "creator": creator,
        "version_code": 7,
        "price_micros": 0,
        "payload": { "title": package },
    })
}

fn details(package: &str, creator: &str, similar: &[&str]) -> serde_json::Value {
    json!({
        "entry": listing(package, creator),
        "similar": similar,
    })
}

async fn mount_json(server: &MockServer, route: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// One category with one chart listing com.a and com.b
async fn mount_catalog_tree(server: &MockServer) {
    mount_json(server, "/categories", json!([{ "id": "GAME", "title": "Games" }])).await;
    mount_json(server, "/categories/GAME/subcategories", json!([])).await;
    mount_json(
        server,
        "/categories/GAME/charts",
        json!([{
            "id": "topselling_free",
            "title": "Top Free",
            "entries": [listing("com.a", "Alpha"), listing("com.b", "Beta")],
        }]),
    )
    .await;
}

fn catalog(config: &Config) -> Arc<dyn CatalogClient> {
    Arc::new(HttpCatalogClient::new(&config.catalog).unwrap())
}

fn open_store(config: &Config) -> SqliteStorage {
    SqliteStorage::new(Path::new(&config.store.database_path)).unwrap()
}

#[tokio::test]
async fn test_seed_enqueues_chart_entries() {
    let server = MockServer::start().await;
    mount_catalog_tree(&server).await;
    let dir = TempDir::new().unwrap();
    let (_file, config, hash) = create_test_config(&server.uri(), dir.path());

    let report = crawler::seed(&config, &hash, catalog(&config), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.charts, 1);
    assert_eq!(report.tasks_enqueued, 2);

    let store = open_store(&config);
    assert_eq!(
        store.count_tasks(TaskKind::Details, LeaseState::Pending).unwrap(),
        2
    );
    assert_eq!(store.count_records().unwrap(), 0);

    let run = store.get_latest_run().unwrap().unwrap();
    assert_eq!(run.kind, RunKind::Seed);
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.config_hash, hash);
}

#[tokio::test]
async fn test_full_crawl_and_download() {
    let server = MockServer::start().await;
    mount_catalog_tree(&server).await;
    mount_json(&server, "/apps/com.a", details("com.a", "Alpha", &["com.c"])).await;
    mount_json(&server, "/apps/com.c", details("com.c", "Alpha", &[])).await;
    Mock::given(method("GET"))
        .and(path("/apps/com.b"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Item not found"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("creator", "Alpha"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/apps/com.a/versions/7/binary"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"APK-A".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/apps/com.c/versions/7/binary"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (_file, config, hash) = create_test_config(&server.uri(), dir.path());

    crawler::seed(&config, &hash, catalog(&config), CancellationToken::new())
        .await
        .unwrap();

    let report = crawler::crawl(&config, &hash, catalog(&config), 1, CancellationToken::new())
        .await
        .unwrap();

    // DETAILS com.a, CREATOR Alpha, DETAILS com.c succeed; DETAILS com.b is gone
    assert_eq!(report.outcome, LoopOutcome::Exhausted);
    assert_eq!(report.completed, 3);
    assert_eq!(report.failed, 1);

    {
        let store = open_store(&config);

        let a = store.find_task(TaskKind::Details, "com.a").unwrap().unwrap();
        assert_eq!(a.state(), LeaseState::Done);
        assert!(a.error.is_none());

        let b = store.find_task(TaskKind::Details, "com.b").unwrap().unwrap();
        assert_eq!(b.state(), LeaseState::Done);
        assert_eq!(b.error.unwrap().status, Some(404));

        let creator = store.find_task(TaskKind::Creator, "Alpha").unwrap().unwrap();
        assert_eq!(creator.state(), LeaseState::Done);

        let records = store.find_records("com.a").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].version_code, 7);
        assert_eq!(records[0].device_profile, "bacon");
        assert_eq!(records[0].cross_references.similar, vec!["com.c".to_string()]);
        assert_eq!(store.count_records().unwrap(), 2);
    }

    let downloads = crawler::download(&config, &hash, catalog(&config), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(downloads.outcome, LoopOutcome::Exhausted);
    assert_eq!(downloads.downloaded, 1);
    assert_eq!(downloads.skipped, 1);

    let store = open_store(&config);
    let a = &store.find_records("com.a").unwrap()[0];
    assert_eq!(a.download_state(), LeaseState::Done);
    let written = dir
        .path()
        .join("apks")
        .join(format!("com.a##7##{}.apk", a.id));
    assert_eq!(std::fs::read(written).unwrap(), b"APK-A");

    // No binary for com.c: left leased for a later attempt
    let c = &store.find_records("com.c").unwrap()[0];
    assert_eq!(c.download_state(), LeaseState::Leased);

    let stats = load_statistics(&store).unwrap();
    assert_eq!(stats.failed_tasks, 1);
    assert_eq!(stats.total_records, 2);
    assert_eq!(stats.latest_run.unwrap().kind, RunKind::Download);
}

#[tokio::test]
async fn test_transient_catalog_error_fails_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/categories"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (_file, config, hash) = create_test_config(&server.uri(), dir.path());

    let result = crawler::seed(&config, &hash, catalog(&config), CancellationToken::new()).await;

    assert!(result.is_err());
    let run = open_store(&config).get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_prioritize_bumps_details_tasks() {
    let server = MockServer::start().await;
    mount_catalog_tree(&server).await;
    let dir = TempDir::new().unwrap();
    let (_file, config, hash) = create_test_config(&server.uri(), dir.path());

    crawler::seed(&config, &hash, catalog(&config), CancellationToken::new())
        .await
        .unwrap();

    let matched = crawler::prioritize(
        &config,
        &hash,
        TaskKind::Details,
        &["com.b".to_string(), "com.missing".to_string()],
        config.crawler.default_priority_bump,
    )
    .unwrap();
    assert_eq!(matched, 1);

    // com.b was enqueued second but now comes first
    let mut store = open_store(&config);
    let claimed = store.claim().unwrap().unwrap();
    assert_eq!(claimed.key, "com.b");
    assert_eq!(claimed.priority, 10);
}
