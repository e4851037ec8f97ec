//! End-to-end runs of both orchestrators against a mock CZDS server

mod common;

use chrono::NaiveDate;
use common::*;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zonefeed_common::types::{DownloadStatus, DownloadSummary, JobState, RecordType, ZoneRecord};
use zonefeed_ingest::config::{IngestConfig, RetentionPolicy};
use zonefeed_ingest::orchestrator::{IngestOrchestrator, ParallelOrchestrator, RunError};
use zonefeed_ingest::storage::{MemoryStore, ZoneStore, LAST_SUMMARY_KEY};

async fn server_with_zones(tlds: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    mount_auth(&server, TOKEN).await;
    mount_links(&server, tlds).await;
    for tld in tlds {
        mount_zone(&server, tld, zone_file(tld)).await;
    }
    server
}

/// A record from an earlier download of `com`
async fn seed_old_record(store: &MemoryStore) {
    let record = ZoneRecord {
        domain_name: "old.com".to_string(),
        tld: "com".to_string(),
        record_type: RecordType::A,
        record_data: "192.0.2.9".to_string(),
        ttl: 3600,
        download_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
    };
    store.insert_zone_records(&[record]).await.unwrap();
}

fn sequential(config: IngestConfig, store: &MemoryStore) -> IngestOrchestrator {
    IngestOrchestrator::new(client(&config), Arc::new(store.clone()), config)
}

fn parallel(config: IngestConfig, store: &MemoryStore) -> ParallelOrchestrator {
    ParallelOrchestrator::new(client(&config), Arc::new(store.clone()), config)
}

// ============================================================================
// Sequential runs
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_run_stores_every_tld() {
    let server = server_with_zones(&["com", "net"]).await;
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let orchestrator = sequential(test_config(&server, dir.path()), &store);

    let summary = orchestrator.run_full_download().await.unwrap().unwrap();

    assert_eq!(summary.total_tlds, 2);
    assert_eq!(summary.successful_tlds, 2);
    assert_eq!(summary.failed_tlds, 0);
    assert_eq!(summary.total_records, 6);

    let logs = store.logs();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.status == DownloadStatus::Success));
    assert!(logs.iter().all(|l| l.records_count == 3));
    assert_eq!(logs[0].tld, "com");
    assert_eq!(logs[1].tld, "net");

    let com = store.records_for_tld("com");
    assert_eq!(com.len(), 3);
    assert_eq!(com.iter().filter(|r| r.record_type == RecordType::Ns).count(), 2);
    assert!(com.iter().all(|r| r.domain_name.ends_with(".com")));

    // Downloaded files are removed once stored
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_is_idle_after_run() {
    let server = server_with_zones(&["com"]).await;
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let orchestrator = sequential(test_config(&server, dir.path()), &store);

    assert!(orchestrator.status().is_idle());
    assert!(orchestrator.last_summary().is_none());

    let summary = orchestrator.run_full_download().await.unwrap().unwrap();

    let status = orchestrator.status();
    assert_eq!(status.state, JobState::Idle);
    assert_eq!(status.progress_percent, 100);
    assert_eq!(status.completed_tlds, 1);
    assert!(!orchestrator.is_running());
    assert_eq!(orchestrator.last_summary(), Some(summary));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_zone_does_not_stop_the_run() {
    let server = MockServer::start().await;
    mount_auth(&server, TOKEN).await;
    mount_links(&server, &["com", "xyz", "net"]).await;
    mount_zone(&server, "com", zone_file("com")).await;
    mount_status(&server, "xyz", 404).await;
    mount_zone(&server, "net", zone_file("net")).await;

    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let orchestrator = sequential(test_config(&server, dir.path()), &store);
    let summary = orchestrator.run_full_download().await.unwrap().unwrap();

    assert_eq!(summary.total_tlds, 3);
    assert_eq!(summary.successful_tlds, 2);
    assert_eq!(summary.failed_tlds, 1);
    assert_eq!(summary.total_records, 6);

    let failed: Vec<_> = store
        .logs()
        .into_iter()
        .filter(|l| l.status == DownloadStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].tld, "xyz");
    assert!(failed[0].error_message.as_deref().unwrap().contains("xyz"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_corrupt_zone_fails_only_that_tld() {
    let server = MockServer::start().await;
    mount_auth(&server, TOKEN).await;
    mount_links(&server, &["com", "bad"]).await;
    mount_zone(&server, "com", zone_file("com")).await;
    mount_zone(&server, "bad", b"this is not gzip".to_vec()).await;

    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let orchestrator = sequential(test_config(&server, dir.path()), &store);
    let summary = orchestrator.run_full_download().await.unwrap().unwrap();

    assert_eq!(summary.successful_tlds, 1);
    assert_eq!(summary.failed_tlds, 1);
    let bad = store.logs().into_iter().find(|l| l.tld == "bad").unwrap();
    assert_eq!(bad.status, DownloadStatus::Failed);
    assert!(bad
        .error_message
        .unwrap()
        .starts_with("Processing failed for bad"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_large_files_use_chunk_processor() {
    let server = server_with_zones(&["com"]).await;
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&server, dir.path());
    config.large_file_threshold = 0;
    let store = MemoryStore::new();
    let orchestrator = sequential(config, &store);

    let summary = orchestrator.run_full_download().await.unwrap().unwrap();

    assert_eq!(summary.total_records, 3);
    // Chunk consumers each open their own handle
    assert!(store.connections() > 2);
    assert_eq!(store.record_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_tld_list_gives_zero_summary() {
    let server = server_with_zones(&[]).await;
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let orchestrator = sequential(test_config(&server, dir.path()), &store);

    let summary = orchestrator.run_full_download().await.unwrap().unwrap();

    assert_eq!(summary.total_tlds, 0);
    assert_eq!(summary.total_records, 0);
    assert!(store.logs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_authentication_failure_aborts_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(AUTH_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let orchestrator = sequential(test_config(&server, dir.path()), &store);

    let err = orchestrator.run_full_download().await.unwrap_err();
    assert!(matches!(err, RunError::Authentication(_)));
    assert!(!orchestrator.is_running());
    assert!(store.logs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tld_list_failure_aborts_run() {
    let server = MockServer::start().await;
    mount_auth(&server, TOKEN).await;
    Mock::given(method("GET"))
        .and(path(LINKS_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let orchestrator = sequential(test_config(&server, dir.path()), &store);

    let err = orchestrator.run_full_download().await.unwrap_err();
    assert!(matches!(err, RunError::TldList(_)));
    assert!(orchestrator.status().is_idle());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_run_is_rejected_while_running() {
    let server = MockServer::start().await;
    mount_auth(&server, TOKEN).await;
    mount_links(&server, &["com"]).await;
    Mock::given(method("GET"))
        .and(path("/czds/downloads/com.zone"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(zone_file("com"))
                .set_delay(std::time::Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let orchestrator = sequential(test_config(&server, dir.path()), &store);

    let (first, second) = tokio::join!(orchestrator.run_full_download(), async {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        orchestrator.run_full_download().await
    });

    assert!(first.unwrap().is_some());
    assert!(second.unwrap().is_none());
    assert_eq!(store.logs().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_summary_is_persisted() {
    let server = server_with_zones(&["com"]).await;
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let orchestrator = sequential(test_config(&server, dir.path()), &store);

    assert_eq!(orchestrator.load_persisted_summary().await.unwrap(), None);
    let summary = orchestrator.run_full_download().await.unwrap().unwrap();

    let stored: DownloadSummary =
        serde_json::from_str(&store.setting(LAST_SUMMARY_KEY).unwrap()).unwrap();
    assert_eq!(stored, summary);
    assert_eq!(
        orchestrator.load_persisted_summary().await.unwrap(),
        Some(summary)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_before_run_is_cleared() {
    let server = server_with_zones(&["com"]).await;
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let orchestrator = sequential(test_config(&server, dir.path()), &store);

    orchestrator.stop();
    let summary = orchestrator.run_full_download().await.unwrap().unwrap();
    assert_eq!(summary.total_tlds, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_while_idle_does_not_affect_single_tld() {
    let server = server_with_zones(&["com"]).await;
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&server, dir.path());
    config.large_file_threshold = 0;
    let store = MemoryStore::new();
    let orchestrator = sequential(config, &store);

    orchestrator.stop();
    let result = orchestrator.process_tld("com").await;

    assert_eq!(result.status, DownloadStatus::Success);
    assert_eq!(result.records_count, 3);
    assert_eq!(store.record_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_mid_run_keeps_approved_total_and_expires() {
    let server = MockServer::start().await;
    mount_auth(&server, TOKEN).await;
    mount_links(&server, &["com", "net", "org"]).await;
    Mock::given(method("GET"))
        .and(path("/czds/downloads/com.zone"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(zone_file("com"))
                .set_delay(std::time::Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    mount_zone(&server, "net", zone_file("net")).await;
    mount_zone(&server, "org", zone_file("org")).await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(&server, dir.path());
    config.large_file_threshold = 0;
    let store = MemoryStore::new();
    let orchestrator = sequential(config, &store);

    let (summary, ()) = tokio::join!(orchestrator.run_full_download(), async {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        orchestrator.stop();
    });
    let summary = summary.unwrap().unwrap();

    // com was mid-download and its chunks are skipped; net and org never start
    assert_eq!(summary.total_tlds, 3);
    assert_eq!(summary.successful_tlds, 1);
    assert_eq!(summary.failed_tlds, 0);
    let logs = store.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, DownloadStatus::Partial);

    // The stop ended with the run
    let result = orchestrator.process_tld("net").await;
    assert_eq!(result.status, DownloadStatus::Success);
    assert_eq!(result.records_count, 3);
}

// ============================================================================
// Retention
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_preserve_history_keeps_records() {
    let server = server_with_zones(&["com"]).await;
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    seed_old_record(&store).await;
    let orchestrator = sequential(test_config(&server, dir.path()), &store);

    orchestrator.run_full_download().await.unwrap();
    assert_eq!(store.records_for_tld("com").len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_replace_existing_deletes_old_records() {
    let server = server_with_zones(&["com"]).await;
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    seed_old_record(&store).await;
    let mut config = test_config(&server, dir.path());
    config.retention = RetentionPolicy::ReplaceExisting;
    let orchestrator = sequential(config, &store);

    orchestrator.run_full_download().await.unwrap();
    let records = store.records_for_tld("com");
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.domain_name != "old.com"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_failure_does_not_fail_tld() {
    let server = server_with_zones(&["com"]).await;
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    store.fail_deletes(true);
    let mut config = test_config(&server, dir.path());
    config.retention = RetentionPolicy::ReplaceExisting;
    let orchestrator = sequential(config, &store);

    let summary = orchestrator.run_full_download().await.unwrap().unwrap();
    assert_eq!(summary.successful_tlds, 1);
}

// ============================================================================
// Parallel runs
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_run_stores_every_tld() {
    let tlds = ["com", "net", "org", "xyz"];
    let server = server_with_zones(&tlds).await;
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let orchestrator = parallel(test_config(&server, dir.path()), &store);

    let summary = orchestrator.run_full_download().await.unwrap().unwrap();

    assert_eq!(summary.total_tlds, 4);
    assert_eq!(summary.successful_tlds, 4);
    assert_eq!(summary.total_records, 12);
    assert_eq!(store.record_count(), 12);

    let mut logged: Vec<_> = store.logs().into_iter().map(|l| l.tld).collect();
    logged.sort();
    assert_eq!(logged, vec!["com", "net", "org", "xyz"]);

    let status = orchestrator.status();
    assert!(status.is_idle());
    assert_eq!(status.completed_tlds, 4);
    assert_eq!(orchestrator.last_summary(), Some(summary));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_run_isolates_failures() {
    let server = MockServer::start().await;
    mount_auth(&server, TOKEN).await;
    mount_links(&server, &["com", "xyz", "net"]).await;
    mount_zone(&server, "com", zone_file("com")).await;
    mount_status(&server, "xyz", 404).await;
    mount_zone(&server, "net", zone_file("net")).await;

    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let orchestrator = parallel(test_config(&server, dir.path()), &store);
    let summary = orchestrator.run_full_download().await.unwrap().unwrap();

    assert_eq!(summary.successful_tlds, 2);
    assert_eq!(summary.failed_tlds, 1);
    assert_eq!(summary.total_records, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_tld_entry_point() {
    let server = server_with_zones(&["com"]).await;
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let orchestrator = parallel(test_config(&server, dir.path()), &store);

    let result = orchestrator.process_tld("com").await;

    assert_eq!(result.status, DownloadStatus::Success);
    assert_eq!(result.records_count, 3);
    assert_eq!(store.logs().len(), 1);
    assert!(orchestrator.status().is_idle());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_stop_while_idle_does_not_affect_single_tld() {
    let server = server_with_zones(&["com"]).await;
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let orchestrator = parallel(test_config(&server, dir.path()), &store);

    orchestrator.stop();
    let result = orchestrator.process_tld("com").await;

    assert_eq!(result.status, DownloadStatus::Success);
    assert_eq!(result.records_count, 3);
    assert!(result.error_message.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_stop_after_run_does_not_affect_single_tld() {
    let server = server_with_zones(&["com", "net"]).await;
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let orchestrator = parallel(test_config(&server, dir.path()), &store);

    orchestrator.run_full_download().await.unwrap().unwrap();
    orchestrator.stop();
    let result = orchestrator.process_tld("com").await;

    assert_eq!(result.status, DownloadStatus::Success);
    assert_eq!(result.records_count, 3);
}
