#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use arrow::array::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use glacier_index::{
    IndexEntry, IndexStore, IndexStoreError, IndexTables, IndexWriter, InMemoryIndexStore,
    RegisteredSnapshot,
};
use glacier_ingestor_core::{
    BufferIngestor, FilenameSequencer, ManualClock, PipelineSummary, SnapshotFile,
    SnapshotMaterializer,
};
use glacier_object_store::{
    FactoryObjectStorage, ObjectStorage, StorageError, StorageResult, TemporaryFileSystemFactory,
};
use glacier_resources::{
    BookRecord, BucketName, PartitionName, RetryPolicy, Snapshot, SnapshotId, SnapshotRef,
    books_to_record_batch,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const TEST_PID: i64 = 4242;

pub fn test_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date")
}

pub fn bucket() -> BucketName {
    BucketName::new_unchecked("daily")
}

pub fn partition() -> PartitionName {
    PartitionName::new_unchecked("daily")
}

/// A book whose single-row batch is exactly 400 bytes.
pub fn book(isbn: &str) -> BookRecord {
    assert_eq!(isbn.len(), 13);
    BookRecord {
        isbn: isbn.to_string(),
        description: "x".repeat(327),
        author: "Jane Doe".to_string(),
        pages: 320,
        pub_date: NaiveDate::from_ymd_opt(2021, 6, 1).expect("valid date"),
    }
}

pub fn books_batch(isbns: &[&str]) -> RecordBatch {
    let books: Vec<_> = isbns.iter().map(|isbn| book(isbn)).collect();
    books_to_record_batch(&books, TEST_PID).expect("books batch")
}

pub fn isbn(n: usize) -> String {
    format!("978{n:010}")
}

/// Object storage that fails on demand.
pub struct FaultyStorage {
    inner: FactoryObjectStorage,
    transient_put_failures: AtomicU32,
    lost_put_acks: AtomicU32,
    hanging_puts: AtomicU32,
    pub put_calls: AtomicU32,
}

impl FaultyStorage {
    pub fn new() -> Self {
        let factory = TemporaryFileSystemFactory::new().expect("object store factory");
        Self {
            inner: FactoryObjectStorage::new(Arc::new(factory)),
            transient_put_failures: AtomicU32::new(0),
            lost_put_acks: AtomicU32::new(0),
            hanging_puts: AtomicU32::new(0),
            put_calls: AtomicU32::new(0),
        }
    }

    /// The next `n` puts fail with a transient error without writing.
    pub fn fail_puts(&self, n: u32) {
        self.transient_put_failures.store(n, Ordering::SeqCst);
    }

    /// The next `n` puts write the object but report a transient error.
    pub fn lose_put_acks(&self, n: u32) {
        self.lost_put_acks.store(n, Ordering::SeqCst);
    }

    /// The next `n` puts never complete.
    pub fn hang_puts(&self, n: u32) {
        self.hanging_puts.store(n, Ordering::SeqCst);
    }

    pub async fn read_snapshot(&self, key: &str) -> SnapshotFile {
        let data = self.inner.get(&bucket(), key).await.expect("snapshot object");
        SnapshotFile::decode(data).expect("snapshot file")
    }

    /// Waits until the object exists, panicking after a few seconds.
    pub async fn wait_for(&self, key: &str) {
        for _ in 0..500 {
            if self.inner.exists(&bucket(), key).await.expect("exists") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("object {key} never appeared");
    }
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn transient(bucket: &BucketName, key: &str) -> StorageError {
    StorageError::Timeout {
        operation: "put",
        bucket: bucket.clone(),
        key: key.to_string(),
    }
}

#[async_trait]
impl ObjectStorage for FaultyStorage {
    async fn put(&self, bucket: &BucketName, key: &str, data: Bytes) -> StorageResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        if take(&self.hanging_puts) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        if take(&self.transient_put_failures) {
            return Err(transient(bucket, key));
        }

        if take(&self.lost_put_acks) {
            self.inner.put(bucket, key, data).await?;
            return Err(transient(bucket, key));
        }

        self.inner.put(bucket, key, data).await
    }

    async fn get(&self, bucket: &BucketName, key: &str) -> StorageResult<Bytes> {
        self.inner.get(bucket, key).await
    }

    async fn list(&self, bucket: &BucketName, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(bucket, prefix).await
    }

    async fn delete(&self, bucket: &BucketName, key: &str) -> StorageResult<()> {
        self.inner.delete(bucket, key).await
    }

    async fn exists(&self, bucket: &BucketName, key: &str) -> StorageResult<bool> {
        self.inner.exists(bucket, key).await
    }
}

/// Index store whose appends always fail with a transient error.
#[derive(Default)]
pub struct UnavailableIndexStore {
    inner: InMemoryIndexStore,
    pub append_calls: AtomicU32,
}

#[async_trait]
impl IndexStore for UnavailableIndexStore {
    async fn register_snapshot(
        &self,
        table: &str,
        snapshot: &Snapshot,
    ) -> glacier_index::Result<SnapshotRef> {
        self.inner.register_snapshot(table, snapshot).await
    }

    async fn append_rows(&self, _table: &str, _rows: &[IndexEntry]) -> glacier_index::Result<u64> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        Err(IndexStoreError::Unavailable {
            message: "connection refused".to_string(),
        })
    }

    async fn list_snapshots(
        &self,
        table: &str,
        partition: &PartitionName,
    ) -> glacier_index::Result<Vec<RegisteredSnapshot>> {
        self.inner.list_snapshots(table, partition).await
    }

    async fn supersede(
        &self,
        tables: &IndexTables,
        sources: &[SnapshotId],
        replacement: SnapshotId,
    ) -> glacier_index::Result<u64> {
        self.inner.supersede(tables, sources, replacement).await
    }

    async fn entries(
        &self,
        table: &str,
        snapshot: SnapshotId,
    ) -> glacier_index::Result<Vec<IndexEntry>> {
        self.inner.entries(table, snapshot).await
    }
}

pub fn sequencer() -> Arc<FilenameSequencer> {
    Arc::new(FilenameSequencer::new(ManualClock::new(test_date())))
}

pub fn materializer(storage: Arc<dyn ObjectStorage>) -> SnapshotMaterializer {
    SnapshotMaterializer::new(storage, sequencer(), bucket(), partition(), "books")
        .with_retry_policy(RetryPolicy::fixed(3, Duration::from_millis(10)))
}

pub fn index_writer(store: Arc<dyn IndexStore>) -> IndexWriter {
    IndexWriter::new(store, IndexTables::default())
        .with_retry_policy(RetryPolicy::fixed(3, Duration::from_millis(10)))
}

pub fn spawn_pipeline(
    ingestor: BufferIngestor,
) -> (JoinHandle<PipelineSummary>, CancellationToken) {
    let ct = CancellationToken::new();
    let task = tokio::spawn({
        let ct = ct.clone();
        async move { ingestor.run(ct).await.expect("ingestor run") }
    });

    (task, ct)
}
