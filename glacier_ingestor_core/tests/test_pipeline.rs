use std::{collections::HashSet, sync::Arc};

use arrow::array::AsArray;
use common::{
    FaultyStorage, UnavailableIndexStore, books_batch, index_writer, isbn, materializer,
    partition, spawn_pipeline,
};
use glacier_index::{IndexStore, InMemoryIndexStore};
use glacier_ingestor_core::{
    BufferIngestor, IngestorError, SnapshotFile, SpillDirectory, StreamRegistry,
    buffer::estimate_batch_size, recover_spilled,
};
use glacier_resources::{StreamName, book_schema};

mod common;

fn isbns(file: &SnapshotFile) -> Vec<String> {
    file.batches
        .iter()
        .flat_map(|batch| {
            batch
                .column_by_name("isbn")
                .expect("isbn column")
                .as_string::<i32>()
                .iter()
                .map(|v| v.expect("non null isbn").to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn new_ingestor(
    storage: Arc<FaultyStorage>,
    index: Arc<dyn IndexStore>,
    threshold: u64,
) -> BufferIngestor {
    BufferIngestor::new(
        StreamName::new_unchecked("books"),
        book_schema(),
        threshold,
        materializer(storage),
        index_writer(index),
    )
}

#[tokio::test]
async fn test_threshold_cutover_end_to_end() {
    let storage = Arc::new(FaultyStorage::new());
    let index = Arc::new(InMemoryIndexStore::new());
    let ingestor = new_ingestor(storage.clone(), index.clone(), 1000);
    let client = ingestor.client();
    let (task, ct) = spawn_pipeline(ingestor);

    let a = books_batch(&["9780000000001"]);
    assert_eq!(estimate_batch_size(&a), 400);

    assert_eq!(client.extend(a).unwrap().cutover, None);
    assert_eq!(client.status().estimated_size, 400);
    assert_eq!(
        client.extend(books_batch(&["9780000000002"])).unwrap().cutover,
        None
    );
    assert_eq!(client.status().estimated_size, 800);

    let ack = client.extend(books_batch(&["9780000000003"])).unwrap();
    assert_eq!(ack.rows, 1);
    assert_eq!(ack.cutover, Some(1));

    let status = client.status();
    assert_eq!(status.estimated_size, 0);
    assert_eq!(status.row_count, 0);

    storage.wait_for("daily/books_20240115_001.parquet").await;
    let snapshot = storage
        .read_snapshot("daily/books_20240115_001.parquet")
        .await;
    assert_eq!(
        isbns(&snapshot),
        vec!["9780000000001", "9780000000002", "9780000000003"]
    );

    assert_eq!(
        client.extend(books_batch(&["9780000000004"])).unwrap().cutover,
        None
    );
    let status = client.status();
    assert_eq!(status.estimated_size, 400);
    assert_eq!(status.row_count, 1);

    ct.cancel();
    let summary = task.await.unwrap();
    assert_eq!(summary.snapshots, 2);
    assert_eq!(summary.rows, 4);
    assert_eq!(summary.indexed_rows, 4);
    assert_eq!(summary.index_failures, 0);

    // Shutdown materialized the remaining row.
    let last = storage
        .read_snapshot("daily/books_20240115_002.parquet")
        .await;
    assert_eq!(isbns(&last), vec!["9780000000004"]);

    let registered = index
        .list_snapshots("parquet_index", &partition())
        .await
        .unwrap();
    assert_eq!(registered.len(), 2);
    assert_eq!(registered[0].snapshot.row_count, 3);

    let entries = index
        .entries("books_index", registered[0].id)
        .await
        .unwrap();
    let indexed: Vec<_> = entries.iter().map(|e| e.isbn.as_str()).collect();
    assert_eq!(indexed, vec!["9780000000001", "9780000000002", "9780000000003"]);
    assert!(entries.iter().all(|e| e.pid == common::TEST_PID));
}

#[tokio::test]
async fn test_writes_after_shutdown_are_rejected() {
    let storage = Arc::new(FaultyStorage::new());
    let ingestor = new_ingestor(storage, Arc::new(InMemoryIndexStore::new()), 1000);
    let client = ingestor.client();
    let (task, ct) = spawn_pipeline(ingestor);

    ct.cancel();
    let summary = task.await.unwrap();
    assert_eq!(summary.snapshots, 0);

    let err = client
        .extend(books_batch(&["9780000000001"]))
        .unwrap_err();
    assert!(matches!(err, IngestorError::PipelineClosed { .. }));
}

#[tokio::test]
async fn test_concurrent_writers_keep_every_row_once_and_in_order() {
    let storage = Arc::new(FaultyStorage::new());
    let ingestor = new_ingestor(storage.clone(), Arc::new(InMemoryIndexStore::new()), 2000);
    let client = ingestor.client();
    let (task, ct) = spawn_pipeline(ingestor);

    let writers = 8;
    let per_writer = 40;
    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let client = client.clone();
            tokio::spawn(async move {
                for i in 0..per_writer {
                    let isbn = isbn(w * per_writer + i);
                    client.extend(books_batch(&[&isbn])).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    ct.cancel();
    let summary = task.await.unwrap();
    assert_eq!(summary.rows, (writers * per_writer) as u64);

    let keys = storage_keys(&storage).await;
    assert_eq!(keys.len() as u64, summary.snapshots);

    let mut all = Vec::new();
    for key in &keys {
        all.extend(isbns(&storage.read_snapshot(key).await));
    }

    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), writers * per_writer);
    assert_eq!(unique.len(), all.len());

    // Each writer's rows appear in the order it wrote them.
    for w in 0..writers {
        let own: Vec<_> = all
            .iter()
            .filter(|isbn| {
                let n: usize = isbn[3..].parse().unwrap();
                n / per_writer == w
            })
            .collect();
        let mut sorted = own.clone();
        sorted.sort();
        assert_eq!(own, sorted);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_during_concurrent_writes_keeps_every_acknowledged_row() {
    let storage = Arc::new(FaultyStorage::new());
    let ingestor = new_ingestor(storage.clone(), Arc::new(InMemoryIndexStore::new()), 500);
    let client = ingestor.client();
    let (task, ct) = spawn_pipeline(ingestor);

    let writers = 8;
    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let client = client.clone();
            std::thread::spawn(move || {
                let mut acked = Vec::new();
                for i in 0.. {
                    let isbn = isbn(w * 1_000_000 + i);
                    match client.extend(books_batch(&[&isbn])) {
                        Ok(_) => acked.push(isbn),
                        Err(IngestorError::PipelineClosed { .. }) => break,
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                }
                acked
            })
        })
        .collect();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    ct.cancel();
    let summary = task.await.unwrap();

    let mut acked: Vec<String> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    acked.sort();
    assert!(!acked.is_empty());

    let mut stored = Vec::new();
    for key in storage_keys(&storage).await {
        stored.extend(isbns(&storage.read_snapshot(&key).await));
    }
    assert_eq!(summary.rows, stored.len() as u64);

    stored.sort();
    assert_eq!(stored, acked);
}

async fn storage_keys(storage: &FaultyStorage) -> Vec<String> {
    use glacier_object_store::ObjectStorage;

    storage
        .list(&common::bucket(), "daily/")
        .await
        .expect("list snapshots")
}

#[tokio::test]
async fn test_index_failure_is_observable_and_snapshot_kept() {
    let storage = Arc::new(FaultyStorage::new());
    let index = Arc::new(UnavailableIndexStore::default());
    let ingestor = new_ingestor(storage.clone(), index.clone(), 1000);
    let client = ingestor.client();
    let (task, ct) = spawn_pipeline(ingestor);

    client.extend(books_batch(&["9780000000001"])).unwrap();
    client.flush().unwrap();

    ct.cancel();
    let summary = task.await.unwrap();

    assert_eq!(summary.snapshots, 1);
    assert_eq!(summary.index_failures, 1);
    assert_eq!(summary.indexed_rows, 0);
    assert_eq!(
        index.append_calls.load(std::sync::atomic::Ordering::SeqCst),
        3
    );

    let snapshot = storage
        .read_snapshot("daily/books_20240115_001.parquet")
        .await;
    assert_eq!(snapshot.row_count(), 1);
}

#[tokio::test]
async fn test_failed_upload_is_spilled_and_recovered() {
    let spill_root = tempfile::tempdir().unwrap();
    let spill = SpillDirectory::open(spill_root.path().join("books"))
        .await
        .unwrap();

    let storage = Arc::new(FaultyStorage::new());
    storage.fail_puts(u32::MAX);

    let index = Arc::new(InMemoryIndexStore::new());
    let ingestor = new_ingestor(storage.clone(), index.clone(), 1000)
        .with_spill_directory(spill.clone());
    let client = ingestor.client();
    let (task, ct) = spawn_pipeline(ingestor);

    client
        .extend(books_batch(&["9780000000001", "9780000000002"]))
        .unwrap();

    ct.cancel();
    let summary = task.await.unwrap();
    assert_eq!(summary.snapshots, 0);
    assert_eq!(summary.materialization_failures, 1);
    assert_eq!(summary.spilled.len(), 1);
    assert_eq!(spill.list().await.unwrap(), summary.spilled);

    // Storage is back.
    storage.fail_puts(0);
    let recovered = recover_spilled(
        &spill,
        &materializer(storage.clone()),
        &index_writer(index.clone()),
    )
    .await
    .unwrap();

    assert_eq!(recovered.recovered.len(), 1);
    assert_eq!(recovered.indexed_rows, 2);
    assert!(spill.list().await.unwrap().is_empty());

    let snapshot = storage.read_snapshot(&recovered.recovered[0].path).await;
    assert_eq!(isbns(&snapshot), vec!["9780000000001", "9780000000002"]);
}

#[tokio::test]
async fn test_registry_routes_by_stream() {
    let storage = Arc::new(FaultyStorage::new());
    let ingestor = new_ingestor(storage, Arc::new(InMemoryIndexStore::new()), 1000);
    let registry = StreamRegistry::builder()
        .register(ingestor.client())
        .unwrap()
        .build();

    let ack = registry
        .extend("books", books_batch(&["9780000000001"]))
        .unwrap();
    assert_eq!(ack.rows, 1);

    let err = registry
        .extend("movies", books_batch(&["9780000000001"]))
        .unwrap_err();
    assert!(matches!(err, IngestorError::UnknownStream { .. }));

    let duplicate = StreamRegistry::builder()
        .register(ingestor.client())
        .unwrap()
        .register(ingestor.client());
    assert!(matches!(
        duplicate,
        Err(IngestorError::DuplicateStream { .. })
    ));

    let status = registry.status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].row_count, 1);

    let flushed = registry.flush_all().unwrap();
    assert_eq!(flushed, vec![(StreamName::new_unchecked("books"), 1)]);
    assert_eq!(registry.status()[0].row_count, 0);
}
