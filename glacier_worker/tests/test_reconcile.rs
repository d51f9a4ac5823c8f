use bytes::Bytes;
use chrono::Utc;
use common::{Harness, bucket, partition};
use glacier_index::IndexTables;
use glacier_resources::Snapshot;
use glacier_worker::{list_snapshot_paths, reconcile};

mod common;

#[tokio::test]
async fn test_listing_skips_foreign_objects() {
    let harness = Harness::new();
    let snapshot = harness.ingest(&["9780000000001"]).await;
    harness
        .put_raw("daily/notes.txt", Bytes::from_static(b"hello"))
        .await;
    harness
        .put_raw("daily/nested/books_20240115_001.parquet", Bytes::from_static(b"x"))
        .await;

    let paths = list_snapshot_paths(harness.storage.as_ref(), &bucket(), &partition())
        .await
        .unwrap();
    assert_eq!(paths, vec![snapshot.path]);
}

#[tokio::test]
async fn test_reconcile_reports_both_directions() {
    let harness = Harness::new();
    let indexed = harness.ingest(&["9780000000001"]).await;

    let unindexed = "daily/books_20240115_050.parquet";
    harness
        .put_raw(unindexed, Bytes::from_static(b"never registered"))
        .await;

    let gone = Snapshot {
        name: "books_20240115_060.parquet".to_string(),
        partition: partition(),
        path: "daily/books_20240115_060.parquet".to_string(),
        row_count: 1,
        size_bytes: 10,
        created_at: Utc::now(),
    };
    harness.index_writer.register_snapshot(&gone).await.unwrap();

    let report = reconcile(
        harness.storage.as_ref(),
        &bucket(),
        harness.index.as_ref(),
        &IndexTables::default(),
        &partition(),
    )
    .await
    .unwrap();

    assert!(!report.is_consistent());
    assert_eq!(report.indexed, vec![indexed.path]);
    assert_eq!(report.unindexed, vec![unindexed.to_string()]);
    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.missing[0].snapshot.path, gone.path);
}

#[tokio::test]
async fn test_compacted_partition_is_consistent() {
    let harness = Harness::new();
    harness.ingest(&["9780000000001"]).await;
    harness.ingest(&["9780000000002"]).await;
    harness.compactor.compact(&partition()).await.unwrap();

    let report = reconcile(
        harness.storage.as_ref(),
        &bucket(),
        harness.index.as_ref(),
        &IndexTables::default(),
        &partition(),
    )
    .await
    .unwrap();

    assert!(report.is_consistent());
    assert_eq!(report.indexed.len(), 1);
}

#[tokio::test]
async fn test_registered_snapshot_without_index_rows_is_mismatched() {
    let harness = Harness::new();
    harness.ingest(&["9780000000001"]).await;
    let partial = harness.materialize(&["9780000000002"]).await;
    harness
        .index_writer
        .register_snapshot(&partial)
        .await
        .unwrap();

    let report = reconcile(
        harness.storage.as_ref(),
        &bucket(),
        harness.index.as_ref(),
        &IndexTables::default(),
        &partition(),
    )
    .await
    .unwrap();

    assert!(!report.is_consistent());
    assert!(report.unindexed.is_empty());
    assert_eq!(report.indexed.len(), 2);
    assert_eq!(report.mismatched.len(), 1);
    assert_eq!(report.mismatched[0].snapshot.snapshot.path, partial.path);
    assert_eq!(report.mismatched[0].entries, 0);
}

#[tokio::test]
async fn test_compaction_of_unindexed_snapshot_leaves_partition_consistent() {
    let harness = Harness::new();
    harness.ingest(&["9780000000001"]).await;
    harness.materialize(&["9780000000002"]).await;

    let before = reconcile(
        harness.storage.as_ref(),
        &bucket(),
        harness.index.as_ref(),
        &IndexTables::default(),
        &partition(),
    )
    .await
    .unwrap();
    assert_eq!(before.unindexed.len(), 1);

    harness.compactor.compact(&partition()).await.unwrap();

    let after = reconcile(
        harness.storage.as_ref(),
        &bucket(),
        harness.index.as_ref(),
        &IndexTables::default(),
        &partition(),
    )
    .await
    .unwrap();
    assert!(after.is_consistent());
    assert_eq!(after.indexed.len(), 1);
}
