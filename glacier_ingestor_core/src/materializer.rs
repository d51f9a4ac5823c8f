//! Writes buffers to object storage as Parquet snapshots.
//!
//! Every snapshot gets a fresh name from the [`FilenameSequencer`] and is
//! uploaded under `{partition}/{name}` with create-only semantics. Transient
//! storage failures are retried according to the retry policy, one attempt at
//! a time. If the very first attempt finds the name taken (another process
//! wrote it), a new name is drawn. If a retry finds the name taken, the
//! previous attempt landed after all and the upload counts as done.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::Utc;
use glacier_object_store::{ObjectStorage, StorageError, paths::format_snapshot_path};
use glacier_resources::{
    BucketName, PartitionName, RetryError, RetryPolicy, Snapshot, retry_with_policy,
};
use tracing::{debug, error, info, warn};

use crate::{
    error::{IngestorError, Result},
    manager::SealedBuffer,
    sequencer::FilenameSequencer,
    snapshot_file::{CUTOVER_SEQ_METADATA_KEY, STREAM_METADATA_KEY, SnapshotFile},
};

/// Names drawn before giving up on finding a free one.
const MAX_NAME_ATTEMPTS: u32 = 8;

#[derive(Clone)]
pub struct SnapshotMaterializer {
    storage: Arc<dyn ObjectStorage>,
    sequencer: Arc<FilenameSequencer>,
    bucket: BucketName,
    partition: PartitionName,
    base_name: String,
    policy: RetryPolicy,
    attempt_timeout: Option<Duration>,
}

impl SnapshotMaterializer {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        sequencer: Arc<FilenameSequencer>,
        bucket: BucketName,
        partition: PartitionName,
        base_name: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            sequencer,
            bucket,
            partition,
            base_name: base_name.into(),
            policy: RetryPolicy::exponential(3, Duration::from_millis(200), Duration::from_secs(2)),
            attempt_timeout: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bounds every upload attempt. A timed out attempt is retried, never raced.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Returns a materializer writing to another partition with the same
    /// storage, sequencer and retry settings.
    pub fn with_partition(mut self, partition: PartitionName) -> Self {
        self.partition = partition;
        self
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.storage
    }

    pub fn bucket(&self) -> &BucketName {
        &self.bucket
    }

    pub fn partition(&self) -> &PartitionName {
        &self.partition
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Writes the sealed buffer as a new snapshot.
    ///
    /// On failure the buffer is untouched and stays with the caller.
    pub async fn materialize(&self, sealed: &SealedBuffer) -> Result<Snapshot> {
        let file = SnapshotFile::new(
            sealed.buffer.schema().clone(),
            sealed.buffer.batches().to_vec(),
        )
        .with_metadata(STREAM_METADATA_KEY, sealed.stream.as_str())
        .with_metadata(CUTOVER_SEQ_METADATA_KEY, sealed.seq.to_string());

        self.write_snapshot(&self.base_name, &file).await
    }

    /// Encodes and uploads the file as a new snapshot named after `base_name`.
    pub async fn write_snapshot(&self, base_name: &str, file: &SnapshotFile) -> Result<Snapshot> {
        let data = file.encode()?;
        let row_count = file.row_count();
        let size_bytes = data.len() as u64;

        let mut name_attempts = 0;
        loop {
            name_attempts += 1;
            let name = self.sequencer.next(base_name);
            let path = format_snapshot_path(&self.partition, &name);

            info!(
                bucket = %self.bucket,
                %path,
                rows = row_count,
                bytes = size_bytes,
                "Materializing snapshot"
            );

            match self.upload(&path, data.clone()).await {
                Ok(()) => {
                    info!(%path, rows = row_count, bytes = size_bytes, "Snapshot materialized");

                    return Ok(Snapshot {
                        name,
                        partition: self.partition.clone(),
                        path,
                        row_count,
                        size_bytes,
                        created_at: Utc::now(),
                    });
                }
                Err(RetryError { attempts: 1, source })
                    if source.is_already_exists() && name_attempts < MAX_NAME_ATTEMPTS =>
                {
                    warn!(%path, "Snapshot name already taken. Drawing a new name");
                }
                Err(RetryError { attempts, source }) => {
                    error!(
                        %path,
                        rows = row_count,
                        attempts,
                        err = %source,
                        "Failed to materialize snapshot"
                    );

                    return Err(IngestorError::MaterializationFailed {
                        name,
                        attempts,
                        source,
                    });
                }
            }
        }
    }

    async fn upload(&self, path: &str, data: Bytes) -> Result<(), RetryError<StorageError>> {
        retry_with_policy(
            &self.policy,
            "put snapshot",
            StorageError::is_transient,
            |attempt| {
                let data = data.clone();
                async move {
                    let result = self.put_once(path, data).await;

                    match result {
                        Err(err) if attempt > 1 && err.is_already_exists() => {
                            debug!(path, attempt, "Snapshot written by an earlier attempt");
                            Ok(())
                        }
                        result => result,
                    }
                }
            },
        )
        .await
    }

    async fn put_once(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        let put = self.storage.put(&self.bucket, path, data);

        let Some(timeout) = self.attempt_timeout else {
            return put.await;
        };

        match tokio::time::timeout(timeout, put).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout {
                operation: "put",
                bucket: self.bucket.clone(),
                key: path.to_string(),
            }),
        }
    }
}
