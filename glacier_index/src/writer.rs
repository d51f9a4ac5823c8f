//! Index write-back with bounded retry.
//!
//! Index rows are written only after their snapshot is durable. A transient
//! store failure is retried according to the [`RetryPolicy`] (seven attempts,
//! one second apart, unless configured otherwise). When the policy is
//! exhausted the snapshot stays in storage without index rows and the failure
//! is returned to the caller as [`IndexWriteError::IndexWriteFailed`].
//!
//! Retried appends may leave duplicate index rows if an earlier attempt landed
//! without being acknowledged.

use std::{future::Future, sync::Arc, time::Duration};

use arrow::array::RecordBatch;
use glacier_resources::{RetryPolicy, Snapshot, SnapshotId, SnapshotRef, retry_with_policy};
use tracing::{debug, error};

use crate::{
    entry::project_entries,
    error::{IndexStoreError, IndexWriteError},
    store::{IndexStore, IndexTables},
};

#[derive(Clone)]
pub struct IndexWriter {
    store: Arc<dyn IndexStore>,
    tables: IndexTables,
    policy: RetryPolicy,
    attempt_timeout: Option<Duration>,
}

impl IndexWriter {
    pub fn new(store: Arc<dyn IndexStore>, tables: IndexTables) -> Self {
        Self {
            store,
            tables,
            policy: RetryPolicy::default(),
            attempt_timeout: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bounds every single attempt. A timed out attempt counts as a transient failure.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn tables(&self) -> &IndexTables {
        &self.tables
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    /// Records the snapshot in the snapshot table.
    pub async fn register_snapshot(
        &self,
        snapshot: &Snapshot,
    ) -> Result<SnapshotRef, IndexWriteError> {
        let table = &self.tables.snapshots;

        self.with_retry("register snapshot", || {
            self.store.register_snapshot(table, snapshot)
        })
        .await
        .inspect_err(|err| {
            error!(path = %snapshot.path, err = %err, "Failed to register snapshot");
        })
    }

    /// Appends one index row per record of the batches, pointing at `snapshot`.
    ///
    /// Returns the number of rows written.
    pub async fn write_index(
        &self,
        batches: &[RecordBatch],
        snapshot: &SnapshotRef,
    ) -> Result<u64, IndexWriteError> {
        let mut entries = Vec::new();
        for batch in batches {
            entries.extend(project_entries(batch, snapshot.id)?);
        }

        if entries.is_empty() {
            return Ok(0);
        }

        let table = &self.tables.entries;
        let written = self
            .with_retry("append rows", || self.store.append_rows(table, &entries))
            .await
            .inspect_err(|err| {
                error!(
                    snapshot = %snapshot.path,
                    rows = entries.len(),
                    err = %err,
                    "Failed to write index. Snapshot is not indexed"
                );
            })?;

        debug!(snapshot = %snapshot.path, rows = written, "Index written");

        Ok(written)
    }

    /// Moves the index rows of `sources` to `replacement` and drops the sources.
    pub async fn supersede(
        &self,
        sources: &[SnapshotId],
        replacement: SnapshotId,
    ) -> Result<u64, IndexWriteError> {
        self.with_retry("supersede", || {
            self.store.supersede(&self.tables, sources, replacement)
        })
        .await
    }

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, IndexWriteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IndexStoreError>>,
    {
        let attempt_timeout = self.attempt_timeout;

        retry_with_policy(&self.policy, operation, IndexStoreError::is_transient, |_| {
            let fut = attempt();
            async move {
                let Some(timeout) = attempt_timeout else {
                    return fut.await;
                };

                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(IndexStoreError::Timeout { operation }),
                }
            }
        })
        .await
        .map_err(|err| IndexWriteError::IndexWriteFailed {
            operation,
            after_attempts: err.attempts,
            source: err.source,
        })
    }
}
