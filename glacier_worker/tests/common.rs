#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use arrow::array::{AsArray, RecordBatch};
use bytes::Bytes;
use chrono::NaiveDate;
use glacier_index::{IndexEntry, IndexStore, IndexTables, IndexWriter, InMemoryIndexStore};
use glacier_ingestor_core::{
    Buffer, FilenameSequencer, ManualClock, SealedBuffer, SnapshotFile, SnapshotMaterializer,
};
use glacier_object_store::{FactoryObjectStorage, ObjectStorage, TemporaryFileSystemFactory};
use glacier_resources::{
    BookRecord, BucketName, PartitionName, RetryPolicy, Snapshot, StreamName, book_schema,
    books_to_record_batch,
};
use glacier_worker::Compactor;

pub const TEST_PID: i64 = 7;

pub fn bucket() -> BucketName {
    BucketName::new_unchecked("daily")
}

pub fn partition() -> PartitionName {
    PartitionName::new_unchecked("daily")
}

pub fn books_batch(isbns: &[&str]) -> RecordBatch {
    let books: Vec<_> = isbns
        .iter()
        .map(|isbn| BookRecord {
            isbn: isbn.to_string(),
            description: format!("about {isbn}"),
            author: "Jane Doe".to_string(),
            pages: 100,
            pub_date: NaiveDate::from_ymd_opt(2020, 2, 29).expect("valid date"),
        })
        .collect();

    books_to_record_batch(&books, TEST_PID).expect("books batch")
}

pub fn isbns(file: &SnapshotFile) -> Vec<String> {
    file.batches
        .iter()
        .flat_map(|batch| {
            batch
                .column_by_name("isbn")
                .expect("isbn column")
                .as_string::<i32>()
                .iter()
                .map(|isbn| isbn.expect("non null isbn").to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Storage, index and compactor sharing one sequencer.
pub struct Harness {
    pub storage: Arc<FactoryObjectStorage>,
    pub index: Arc<InMemoryIndexStore>,
    pub materializer: SnapshotMaterializer,
    pub index_writer: IndexWriter,
    pub compactor: Compactor,
    next_seq: std::sync::atomic::AtomicU64,
}

impl Harness {
    pub fn new() -> Self {
        let factory = TemporaryFileSystemFactory::new().expect("object store factory");
        let storage = Arc::new(FactoryObjectStorage::new(Arc::new(factory)));
        let index = Arc::new(InMemoryIndexStore::new());

        let sequencer = Arc::new(FilenameSequencer::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date"),
        )));

        let materializer =
            SnapshotMaterializer::new(storage.clone(), sequencer, bucket(), partition(), "books")
                .with_retry_policy(RetryPolicy::fixed(2, Duration::from_millis(10)));

        let index_writer = IndexWriter::new(index.clone(), IndexTables::default())
            .with_retry_policy(RetryPolicy::fixed(2, Duration::from_millis(10)));

        let compactor = Compactor::new(materializer.clone(), index_writer.clone());

        Self {
            storage,
            index,
            materializer,
            index_writer,
            compactor,
            next_seq: Default::default(),
        }
    }

    /// Materializes and indexes a snapshot holding the given books.
    pub async fn ingest(&self, isbns: &[&str]) -> Snapshot {
        let snapshot = self.materialize(isbns).await;
        let snapshot_ref = self
            .index_writer
            .register_snapshot(&snapshot)
            .await
            .expect("register");
        self.index_writer
            .write_index(&[books_batch(isbns)], &snapshot_ref)
            .await
            .expect("index");

        snapshot
    }

    /// Materializes a snapshot holding the given books without indexing it.
    pub async fn materialize(&self, isbns: &[&str]) -> Snapshot {
        let mut buffer = Buffer::new(book_schema());
        buffer.append(books_batch(isbns)).expect("append");

        let seq = self
            .next_seq
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        let sealed = SealedBuffer {
            stream: StreamName::new_unchecked("books"),
            seq,
            buffer,
        };

        self.materializer.materialize(&sealed).await.expect("materialize")
    }

    /// Index rows of the snapshot registered at `path`.
    pub async fn index_entries(&self, path: &str) -> Vec<IndexEntry> {
        let registered = self
            .index
            .list_snapshots("parquet_index", &partition())
            .await
            .expect("list snapshots");
        let snapshot = registered
            .iter()
            .find(|snapshot| snapshot.snapshot.path == path)
            .expect("registered snapshot");

        self.index
            .entries("books_index", snapshot.id)
            .await
            .expect("index entries")
    }

    pub async fn put_raw(&self, path: &str, data: Bytes) {
        self.storage.put(&bucket(), path, data).await.expect("put");
    }

    pub async fn paths(&self) -> Vec<String> {
        self.storage.list(&bucket(), "daily/").await.expect("list")
    }

    pub async fn raw(&self, path: &str) -> Bytes {
        self.storage.get(&bucket(), path).await.expect("get")
    }

    pub async fn read(&self, path: &str) -> SnapshotFile {
        SnapshotFile::decode(self.raw(path).await).expect("decode")
    }
}
