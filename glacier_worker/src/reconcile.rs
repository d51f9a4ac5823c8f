//! Consistency check between object storage and the index store.

use std::collections::BTreeSet;

use glacier_index::{IndexStore, IndexTables, RegisteredSnapshot};
use glacier_object_store::{ObjectStorage, paths::format_partition_prefix};
use glacier_resources::{BucketName, PartitionName, SNAPSHOT_EXTENSION};
use snafu::ResultExt;
use tracing::{info, warn};

use crate::error::{IndexStoreSnafu, Result, StorageSnafu};

/// Differences between the snapshots in storage and the ones in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub partition: PartitionName,
    /// Snapshots present in both.
    pub indexed: Vec<String>,
    /// Snapshots in storage that were never registered.
    pub unindexed: Vec<String>,
    /// Registered snapshots whose file is gone.
    pub missing: Vec<RegisteredSnapshot>,
    /// Registered snapshots whose index rows do not match their row count.
    pub mismatched: Vec<IndexMismatch>,
}

/// A registered snapshot together with the number of index rows pointing at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMismatch {
    pub snapshot: RegisteredSnapshot,
    pub entries: u64,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.unindexed.is_empty() && self.missing.is_empty() && self.mismatched.is_empty()
    }
}

/// Lists the snapshot files directly under the partition prefix, sorted by path.
pub async fn list_snapshot_paths(
    storage: &dyn ObjectStorage,
    bucket: &BucketName,
    partition: &PartitionName,
) -> Result<Vec<String>> {
    let prefix = format_partition_prefix(partition);

    let keys = storage
        .list(bucket, &prefix)
        .await
        .context(StorageSnafu {
            operation: "list",
            partition: partition.clone(),
        })?;

    Ok(keys
        .into_iter()
        .filter(|key| {
            key.strip_prefix(&prefix).is_some_and(|name| {
                !name.contains('/')
                    && name
                        .rsplit_once('.')
                        .is_some_and(|(_, ext)| ext == SNAPSHOT_EXTENSION)
            })
        })
        .collect())
}

/// Compares the partition's snapshot files with its registered snapshots and
/// their index rows.
///
/// Nothing is repaired; the report says what is out of sync.
pub async fn reconcile(
    storage: &dyn ObjectStorage,
    bucket: &BucketName,
    index: &dyn IndexStore,
    tables: &IndexTables,
    partition: &PartitionName,
) -> Result<ReconcileReport> {
    let stored: BTreeSet<String> = list_snapshot_paths(storage, bucket, partition)
        .await?
        .into_iter()
        .collect();

    let registered = index
        .list_snapshots(&tables.snapshots, partition)
        .await
        .context(IndexStoreSnafu {
            partition: partition.clone(),
        })?;

    let registered_paths: BTreeSet<&str> = registered
        .iter()
        .map(|snapshot| snapshot.snapshot.path.as_str())
        .collect();

    let mut report = ReconcileReport {
        partition: partition.clone(),
        indexed: Vec::new(),
        unindexed: Vec::new(),
        missing: Vec::new(),
        mismatched: Vec::new(),
    };

    for path in &stored {
        if registered_paths.contains(path.as_str()) {
            report.indexed.push(path.clone());
        } else {
            warn!(%partition, snapshot = %path, "Snapshot is not indexed");
            report.unindexed.push(path.clone());
        }
    }

    for snapshot in registered {
        if !stored.contains(&snapshot.snapshot.path) {
            warn!(
                %partition,
                snapshot = %snapshot.snapshot.path,
                id = %snapshot.id,
                "Indexed snapshot is missing from storage"
            );
            report.missing.push(snapshot);
            continue;
        }

        let entries = index
            .entries(&tables.entries, snapshot.id)
            .await
            .context(IndexStoreSnafu {
                partition: partition.clone(),
            })?
            .len() as u64;

        if entries != snapshot.snapshot.row_count {
            warn!(
                %partition,
                snapshot = %snapshot.snapshot.path,
                rows = snapshot.snapshot.row_count,
                entries,
                "Index rows do not match the snapshot"
            );
            report.mismatched.push(IndexMismatch { snapshot, entries });
        }
    }

    info!(
        %partition,
        indexed = report.indexed.len(),
        unindexed = report.unindexed.len(),
        missing = report.missing.len(),
        mismatched = report.mismatched.len(),
        "Partition reconciled"
    );

    Ok(report)
}
