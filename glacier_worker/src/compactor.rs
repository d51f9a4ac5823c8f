//! Merges the snapshots of a partition into one consolidated snapshot.
//!
//! ```text
//!  list ──> finish interrupted runs ──> read (consolidated, then regular) ──> write compacted_D_N
//!                                                                                   │
//!                                    delete inputs <── supersede index rows <──────┘
//! ```
//!
//! A consolidated snapshot records the names of its inputs in its Parquet
//! metadata. If a run stops after writing it, the next run finds inputs that
//! still exist next to it, re-points their index rows and deletes them
//! without merging them again.
//!
//! Only the snapshots listed when the run starts are merged and deleted, so
//! snapshots written during compaction are left for the next run.
//!
//! Inputs whose index write never completed are indexed against the
//! consolidated snapshot before they are deleted.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use chrono::Utc;
use glacier_index::{IndexWriter, RegisteredSnapshot};
use glacier_ingestor_core::{
    Buffer, SnapshotFile, SnapshotMaterializer, snapshot_file::SOURCES_METADATA_KEY,
};
use glacier_object_store::paths::{format_snapshot_path, snapshot_name_from_path};
use glacier_observability::KeyValue;
use glacier_resources::{
    COMPACTED_BASE_NAME, PartitionName, Snapshot, SnapshotId, is_consolidated_name,
    snapshot_order_key,
};
use snafu::ResultExt;
use tracing::{debug, info, warn};

use crate::{
    error::{
        IndexSnafu, IndexStoreSnafu, MergeSnafu, ReadSnapshotSnafu, Result, StorageSnafu,
        WriteSnapshotSnafu,
    },
    metrics::CompactionMetrics,
    reconcile::list_snapshot_paths,
};

/// A snapshot file read from storage together with its size.
struct StoredSnapshot {
    file: SnapshotFile,
    size_bytes: u64,
}

#[derive(Clone)]
pub struct Compactor {
    materializer: SnapshotMaterializer,
    index_writer: IndexWriter,
    metrics: Arc<CompactionMetrics>,
}

impl Compactor {
    /// Creates a compactor writing through `materializer`.
    ///
    /// The materializer's partition and base name are not used. Each run
    /// writes into the partition it compacts, under the `compacted` base name.
    pub fn new(materializer: SnapshotMaterializer, index_writer: IndexWriter) -> Self {
        Self {
            materializer,
            index_writer,
            metrics: Arc::new(CompactionMetrics::default()),
        }
    }

    /// Compacts the partition.
    ///
    /// Returns the consolidated snapshot, or `None` if the partition is empty.
    /// A partition holding a single consolidated snapshot and nothing else is
    /// left untouched and that snapshot is returned.
    pub async fn compact(&self, partition: &PartitionName) -> Result<Option<Snapshot>> {
        let result = self.compact_partition(partition).await;

        if result.is_err() {
            self.metrics
                .failures
                .add(1, &[KeyValue::new("partition", partition.to_string())]);
        }

        result
    }

    async fn compact_partition(&self, partition: &PartitionName) -> Result<Option<Snapshot>> {
        let mut names: BTreeSet<String> = self
            .list_names(partition)
            .await?
            .into_iter()
            .collect();

        if names.is_empty() {
            debug!(%partition, "Nothing to compact");
            return Ok(None);
        }

        let mut loaded = HashMap::new();

        let consolidated: Vec<String> = names
            .iter()
            .filter(|name| is_consolidated_name(name))
            .cloned()
            .collect();

        for name in consolidated {
            // Already retired as a leftover of another consolidated snapshot.
            if !names.contains(&name) {
                continue;
            }

            let stored = self.read(partition, &name).await?;
            let leftovers = self
                .leftovers(partition, &name, &stored.file, &names, &loaded)
                .await?;

            if !leftovers.is_empty() {
                warn!(
                    %partition,
                    snapshot = %name,
                    leftovers = leftovers.len(),
                    "Finishing interrupted compaction"
                );

                let snapshot = self.describe(partition, &name, &stored).await?;
                self.retire(partition, &snapshot, &leftovers).await?;

                for leftover in &leftovers {
                    names.remove(leftover);
                    loaded.remove(leftover);
                }

                self.metrics
                    .resumed_compactions
                    .add(1, &[KeyValue::new("partition", partition.to_string())]);
            }

            loaded.insert(name, stored);
        }

        let (mut consolidated, mut regular): (Vec<String>, Vec<String>) =
            names.into_iter().partition(|name| is_consolidated_name(name));
        consolidated.sort_by(|a, b| snapshot_order_key(a).cmp(&snapshot_order_key(b)));
        regular.sort_by(|a, b| snapshot_order_key(a).cmp(&snapshot_order_key(b)));

        if regular.is_empty() && consolidated.len() <= 1 {
            let Some(name) = consolidated.first() else {
                return Ok(None);
            };

            let Some(stored) = loaded.get(name) else {
                return Ok(None);
            };

            debug!(%partition, snapshot = %name, "Partition already compacted");
            return self.describe(partition, name, stored).await.map(Some);
        }

        let inputs: Vec<String> = consolidated.into_iter().chain(regular).collect();

        info!(%partition, inputs = inputs.len(), "Compacting partition");

        let mut merged: Option<Buffer> = None;
        for name in &inputs {
            let stored = match loaded.remove(name) {
                Some(stored) => stored,
                None => self.read(partition, name).await?,
            };

            let buffer = merged.get_or_insert_with(|| Buffer::new(stored.file.schema.clone()));
            for batch in stored.file.batches {
                buffer.append(batch).context(MergeSnafu {
                    partition: partition.clone(),
                })?;
            }
        }

        let Some(merged) = merged else {
            return Ok(None);
        };

        let file = SnapshotFile::new(merged.schema().clone(), merged.into_batches())
            .with_metadata(SOURCES_METADATA_KEY, inputs.join(","));

        let snapshot = self
            .materializer
            .clone()
            .with_partition(partition.clone())
            .write_snapshot(COMPACTED_BASE_NAME, &file)
            .await
            .context(WriteSnapshotSnafu {
                partition: partition.clone(),
            })?;

        self.retire(partition, &snapshot, &inputs).await?;

        let attributes = [KeyValue::new("partition", partition.to_string())];
        self.metrics.compactions.add(1, &attributes);
        self.metrics
            .merged_snapshots
            .add(inputs.len() as u64, &attributes);
        self.metrics.merged_rows.add(snapshot.row_count, &attributes);

        info!(
            %partition,
            snapshot = %snapshot.path,
            inputs = inputs.len(),
            rows = snapshot.row_count,
            "Partition compacted"
        );

        Ok(Some(snapshot))
    }

    /// Inputs of the consolidated snapshot that still exist, following the
    /// inputs of consolidated inputs.
    async fn leftovers(
        &self,
        partition: &PartitionName,
        name: &str,
        file: &SnapshotFile,
        names: &BTreeSet<String>,
        loaded: &HashMap<String, StoredSnapshot>,
    ) -> Result<Vec<String>> {
        let mut found = Vec::new();
        let mut pending = file.sources();

        while let Some(source) = pending.pop() {
            if source == name || !names.contains(&source) || found.contains(&source) {
                continue;
            }

            if is_consolidated_name(&source) {
                let nested = match loaded.get(&source) {
                    Some(stored) => stored.file.sources(),
                    None => self.read(partition, &source).await?.file.sources(),
                };
                pending.extend(nested);
            }

            found.push(source);
        }

        found.sort();
        Ok(found)
    }

    /// Points the index rows of `sources` at `snapshot`, then deletes the
    /// source files.
    ///
    /// Sources that were never fully indexed have their rows indexed against
    /// `snapshot` first, so merging them does not hide the gap.
    async fn retire(
        &self,
        partition: &PartitionName,
        snapshot: &Snapshot,
        sources: &[String],
    ) -> Result<()> {
        let target = self
            .index_writer
            .register_snapshot(snapshot)
            .await
            .context(IndexSnafu {
                operation: "register snapshot",
            })?;

        let registered = self.registered(partition).await?;
        let mut source_ids = Vec::new();

        for name in sources {
            let path = format_snapshot_path(partition, name);

            let fully_indexed = match registered.get(&path) {
                Some(source) => {
                    source_ids.push(source.id);
                    self.indexed_rows(partition, source.id).await? >= source.snapshot.row_count
                }
                None => false,
            };

            if fully_indexed {
                continue;
            }

            let stored = self.read(partition, name).await?;
            let written = self
                .index_writer
                .write_index(&stored.file.batches, &target)
                .await
                .context(IndexSnafu {
                    operation: "write index",
                })?;

            warn!(
                %partition,
                snapshot = %path,
                consolidated = %target.path,
                rows = written,
                "Indexed rows of a snapshot that was not fully indexed"
            );
        }

        if !source_ids.is_empty() {
            let moved = self
                .index_writer
                .supersede(&source_ids, target.id)
                .await
                .context(IndexSnafu {
                    operation: "supersede",
                })?;

            debug!(
                snapshot = %snapshot.path,
                sources = source_ids.len(),
                moved,
                "Index rows re-pointed"
            );
        }

        let storage = self.materializer.storage();
        let bucket = self.materializer.bucket();

        for name in sources {
            let path = format_snapshot_path(partition, name);

            match storage.delete(bucket, &path).await {
                Ok(()) => debug!(snapshot = %path, "Compacted input deleted"),
                Err(err) if err.is_not_found() => {
                    debug!(snapshot = %path, "Compacted input already deleted")
                }
                Err(err) => {
                    return Err(err).context(StorageSnafu {
                        operation: "delete",
                        partition: partition.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Returns the registered snapshot for `name`, or a description built from
    /// the file if it was never registered.
    async fn describe(
        &self,
        partition: &PartitionName,
        name: &str,
        stored: &StoredSnapshot,
    ) -> Result<Snapshot> {
        let path = format_snapshot_path(partition, name);

        if let Some(registered) = self.registered(partition).await?.remove(&path) {
            return Ok(registered.snapshot);
        }

        Ok(Snapshot {
            name: name.to_string(),
            partition: partition.clone(),
            path,
            row_count: stored.file.row_count(),
            size_bytes: stored.size_bytes,
            created_at: Utc::now(),
        })
    }

    async fn registered(
        &self,
        partition: &PartitionName,
    ) -> Result<HashMap<String, RegisteredSnapshot>> {
        let snapshots = self
            .index_writer
            .store()
            .list_snapshots(&self.index_writer.tables().snapshots, partition)
            .await
            .context(IndexStoreSnafu {
                partition: partition.clone(),
            })?;

        Ok(snapshots
            .into_iter()
            .map(|snapshot| (snapshot.snapshot.path.clone(), snapshot))
            .collect())
    }

    async fn indexed_rows(&self, partition: &PartitionName, snapshot: SnapshotId) -> Result<u64> {
        let entries = self
            .index_writer
            .store()
            .entries(&self.index_writer.tables().entries, snapshot)
            .await
            .context(IndexStoreSnafu {
                partition: partition.clone(),
            })?;

        Ok(entries.len() as u64)
    }

    async fn list_names(&self, partition: &PartitionName) -> Result<Vec<String>> {
        let paths = list_snapshot_paths(
            self.materializer.storage().as_ref(),
            self.materializer.bucket(),
            partition,
        )
        .await?;

        Ok(paths
            .iter()
            .map(|path| snapshot_name_from_path(path).to_string())
            .collect())
    }

    async fn read(&self, partition: &PartitionName, name: &str) -> Result<StoredSnapshot> {
        let path = format_snapshot_path(partition, name);

        let data = self
            .materializer
            .storage()
            .get(self.materializer.bucket(), &path)
            .await
            .context(StorageSnafu {
                operation: "get",
                partition: partition.clone(),
            })?;

        let size_bytes = data.len() as u64;
        let file = SnapshotFile::decode(data).context(ReadSnapshotSnafu { path })?;

        Ok(StoredSnapshot { file, size_bytes })
    }
}
