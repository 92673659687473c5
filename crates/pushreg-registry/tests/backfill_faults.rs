//! Backfill behaviour when the store fails underneath it.

mod common;

use common::{codec, legacy_device, Fault, FaultyStore};
use pushreg_registry::{BackfillJob, BackfillOptions, DeviceId, MemoryDeviceStore, RegistryMetrics};
use std::sync::Arc;

fn legacy_rows() -> MemoryDeviceStore {
    MemoryDeviceStore::from_records(vec![
        legacy_device("d1", "tok-1", "2024-01-01T00:00:00Z"),
        legacy_device("d2", "tok-2", "2024-01-02T00:00:00Z"),
        legacy_device("d3", "tok-3", "2024-01-03T00:00:00Z"),
    ])
}

fn options(chunk_size: usize) -> BackfillOptions {
    BackfillOptions {
        chunk_size,
        dry_run: false,
    }
}

#[tokio::test]
async fn page_fetch_failure_aborts_backfill() {
    let inner = Arc::new(legacy_rows());
    let store = Arc::new(FaultyStore::new(inner.clone(), Fault::UnhashedPage(1)));
    let metrics = Arc::new(RegistryMetrics::new());

    let summary = BackfillJob::new(store, codec(), metrics.clone()).run(&options(1)).await;

    assert!(summary.aborted);
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.updated, 1);
    assert!(!summary.is_success());
    assert!(inner.get(&DeviceId::from("d1")).await.unwrap().token_hash.is_some());
    assert!(inner.get(&DeviceId::from("d2")).await.unwrap().token_hash.is_none());
    assert_eq!(metrics.snapshot().token_hashes_backfilled, 1);
}

#[tokio::test]
async fn first_page_failure_processes_nothing() {
    let inner = Arc::new(legacy_rows());
    let store = Arc::new(FaultyStore::new(inner.clone(), Fault::UnhashedPage(0)));

    let summary = BackfillJob::new(store, codec(), Arc::new(RegistryMetrics::new()))
        .run(&options(10))
        .await;

    assert!(summary.aborted);
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.processed, 0);
    assert!(inner.records().await.iter().all(|r| r.token_hash.is_none()));
}

#[tokio::test]
async fn failed_hash_write_is_counted_and_run_continues() {
    let inner = Arc::new(legacy_rows());
    let store = Arc::new(FaultyStore::new(inner.clone(), Fault::Update("d1")));
    let metrics = Arc::new(RegistryMetrics::new());

    let summary = BackfillJob::new(store, codec(), metrics.clone()).run(&options(10)).await;

    assert!(!summary.aborted);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.updated, 2);
    assert_eq!(summary.failures, 1);
    assert!(inner.get(&DeviceId::from("d1")).await.unwrap().token_hash.is_none());
    assert_eq!(
        inner.get(&DeviceId::from("d2")).await.unwrap().token_hash,
        Some(codec().hash("tok-2").unwrap())
    );
    assert_eq!(metrics.snapshot().token_hashes_backfilled, 2);
}
