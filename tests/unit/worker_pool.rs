//! Worker pool: concurrency bound, ordering, conversions against real output

use async_trait::async_trait;
use chrono::NaiveDate;
use post_archiver::pipeline::{Batch, BatchStatus, ItemConverter, WorkerPool};
use post_archiver::{ConversionResult, ItemDescriptor};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Writes a file per item and records peak concurrency
#[derive(Default)]
struct TrackingConverter {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl ItemConverter for TrackingConverter {
    async fn convert(&self, item: &ItemDescriptor, batch_dir: &Path) -> ConversionResult {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        // later items finish first
        tokio::time::sleep(Duration::from_millis(5 + 30 / item.id)).await;
        let path = batch_dir.join(format!("{}.html", item.id));
        let written = tokio::fs::write(&path, item.title.as_bytes()).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        match written {
            Ok(()) => ConversionResult::success(item, path, vec![]),
            Err(e) => ConversionResult::permanent_failure(item, e.to_string()),
        }
    }
}

fn batch(dir: PathBuf, count: u64) -> Batch {
    let items = (1..=count)
        .map(|id| ItemDescriptor {
            id,
            title: format!("Item {id}"),
            body: "<p>x</p>".into(),
            media: vec![],
            published: NaiveDate::from_ymd_opt(2022, 12, 31)
                .unwrap()
                .and_hms_opt(23, 59, 0)
                .unwrap(),
            terms: vec![],
        })
        .collect();
    Batch::new(7, items, dir)
}

#[tokio::test]
async fn test_three_workers_ten_items() {
    let dir = TempDir::new().unwrap();
    let converter = Arc::new(TrackingConverter::default());
    let pool = WorkerPool::new(3, converter.clone()).unwrap();

    let outcome = pool.process_batch(&batch(dir.path().to_path_buf(), 10)).await;

    assert_eq!(outcome.status, BatchStatus::Complete);
    assert_eq!(outcome.success_count(), 10);
    assert_eq!(converter.calls.load(Ordering::SeqCst), 10);
    assert!(converter.peak.load(Ordering::SeqCst) <= 3);
    assert!(converter.peak.load(Ordering::SeqCst) >= 2);

    let ids: Vec<u64> = outcome.results.iter().map(|r| r.item_id).collect();
    assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    for id in 1..=10 {
        assert!(dir.path().join(format!("{id}.html")).exists());
    }
}

#[tokio::test]
async fn test_pool_reused_across_batches() {
    let converter = Arc::new(TrackingConverter::default());
    let pool = WorkerPool::new(4, converter.clone()).unwrap();

    for _ in 0..3 {
        let dir = TempDir::new().unwrap();
        let outcome = pool.process_batch(&batch(dir.path().to_path_buf(), 6)).await;
        assert_eq!(outcome.index, 7);
        assert_eq!(outcome.success_count(), 6);
    }
    assert_eq!(converter.calls.load(Ordering::SeqCst), 18);
}

#[tokio::test]
async fn test_missing_directory_fails_items_not_batch() {
    let root = TempDir::new().unwrap();
    let converter = Arc::new(TrackingConverter::default());
    let pool = WorkerPool::new(2, converter).unwrap();

    let outcome = pool
        .process_batch(&batch(root.path().join("does-not-exist"), 3))
        .await;
    assert_eq!(outcome.status, BatchStatus::Complete);
    assert_eq!(outcome.failure_count(), 3);
    assert!(outcome.errors.is_empty());
}

#[test]
fn test_zero_workers_rejected() {
    let converter = Arc::new(TrackingConverter::default());
    assert!(WorkerPool::new(0, converter).is_err());
}
