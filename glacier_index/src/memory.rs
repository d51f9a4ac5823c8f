//! In-memory implementation of the index store.
//!
//! Suitable for tests, development and single-process runs where the index does
//! not need to outlive the process.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicI64, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;
use glacier_resources::{PartitionName, Snapshot, SnapshotId, SnapshotRef};
use tracing::debug;

use crate::{
    entry::IndexEntry,
    error::Result,
    store::{IndexStore, IndexTables, RegisteredSnapshot, validate_table_name},
};

#[derive(Debug, Default)]
pub struct InMemoryIndexStore {
    /// Maps table names to their snapshots, keyed by id.
    snapshots: DashMap<String, BTreeMap<SnapshotId, Snapshot>>,
    /// Maps table names to their index rows, in insertion order.
    entries: DashMap<String, Vec<IndexEntry>>,
    last_id: AtomicI64,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of index rows in the table.
    pub fn row_count(&self, table: &str) -> usize {
        self.entries.get(table).map(|rows| rows.len()).unwrap_or(0)
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn register_snapshot(&self, table: &str, snapshot: &Snapshot) -> Result<SnapshotRef> {
        validate_table_name(table)?;

        let mut snapshots = self.snapshots.entry(table.to_string()).or_default();

        if let Some((id, _)) = snapshots.iter().find(|(_, s)| s.path == snapshot.path) {
            return Ok(SnapshotRef {
                id: *id,
                path: snapshot.path.clone(),
            });
        }

        let id = SnapshotId(self.last_id.fetch_add(1, Ordering::SeqCst) + 1);
        snapshots.insert(id, snapshot.clone());

        debug!(table, %id, path = %snapshot.path, "Snapshot registered");

        Ok(SnapshotRef {
            id,
            path: snapshot.path.clone(),
        })
    }

    async fn append_rows(&self, table: &str, rows: &[IndexEntry]) -> Result<u64> {
        validate_table_name(table)?;

        self.entries
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(rows);

        Ok(rows.len() as u64)
    }

    async fn list_snapshots(
        &self,
        table: &str,
        partition: &PartitionName,
    ) -> Result<Vec<RegisteredSnapshot>> {
        validate_table_name(table)?;

        let Some(snapshots) = self.snapshots.get(table) else {
            return Ok(Vec::new());
        };

        let mut registered: Vec<_> = snapshots
            .iter()
            .filter(|(_, snapshot)| &snapshot.partition == partition)
            .map(|(id, snapshot)| RegisteredSnapshot {
                id: *id,
                snapshot: snapshot.clone(),
            })
            .collect();
        registered.sort_by(|a, b| a.snapshot.path.cmp(&b.snapshot.path));

        Ok(registered)
    }

    async fn supersede(
        &self,
        tables: &IndexTables,
        sources: &[SnapshotId],
        replacement: SnapshotId,
    ) -> Result<u64> {
        validate_table_name(&tables.snapshots)?;
        validate_table_name(&tables.entries)?;

        let mut entries = self.entries.entry(tables.entries.clone()).or_default();
        let mut snapshots = self.snapshots.entry(tables.snapshots.clone()).or_default();

        let mut moved = 0;
        for entry in entries.iter_mut() {
            if sources.contains(&entry.snapshot_id) {
                entry.snapshot_id = replacement;
                moved += 1;
            }
        }

        for id in sources {
            if *id != replacement {
                snapshots.remove(id);
            }
        }

        Ok(moved)
    }

    async fn entries(&self, table: &str, snapshot: SnapshotId) -> Result<Vec<IndexEntry>> {
        validate_table_name(table)?;

        Ok(self
            .entries
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|entry| entry.snapshot_id == snapshot)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
