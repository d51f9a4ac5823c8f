use async_trait::async_trait;
use glacier_resources::{PartitionName, Snapshot, SnapshotId, SnapshotRef};

use crate::{
    entry::IndexEntry,
    error::{InvalidTableSnafu, Result},
};

pub const DEFAULT_SNAPSHOT_TABLE: &str = "parquet_index";
pub const DEFAULT_INDEX_TABLE: &str = "books_index";

/// Names of the two index tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTables {
    /// One row per snapshot file.
    pub snapshots: String,
    /// One row per indexed record.
    pub entries: String,
}

impl Default for IndexTables {
    fn default() -> Self {
        Self {
            snapshots: DEFAULT_SNAPSHOT_TABLE.to_string(),
            entries: DEFAULT_INDEX_TABLE.to_string(),
        }
    }
}

/// A snapshot together with the id the store assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredSnapshot {
    pub id: SnapshotId,
    pub snapshot: Snapshot,
}

impl RegisteredSnapshot {
    pub fn to_ref(&self) -> SnapshotRef {
        SnapshotRef {
            id: self.id,
            path: self.snapshot.path.clone(),
        }
    }
}

/// Relational store holding snapshot metadata and record index rows.
///
/// Table names are passed on every call, so one store can serve several
/// streams with their own tables.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Records the snapshot and returns its id.
    ///
    /// Registering the same path twice returns the id of the first registration.
    async fn register_snapshot(&self, table: &str, snapshot: &Snapshot) -> Result<SnapshotRef>;

    /// Appends the rows to the index table. Duplicate rows are kept.
    async fn append_rows(&self, table: &str, rows: &[IndexEntry]) -> Result<u64>;

    /// Lists the snapshots of a partition, sorted by path.
    async fn list_snapshots(
        &self,
        table: &str,
        partition: &PartitionName,
    ) -> Result<Vec<RegisteredSnapshot>>;

    /// Moves the index rows of `sources` to `replacement` and removes the source
    /// snapshots. Returns the number of index rows moved.
    async fn supersede(
        &self,
        tables: &IndexTables,
        sources: &[SnapshotId],
        replacement: SnapshotId,
    ) -> Result<u64>;

    /// Returns the index rows pointing at the snapshot.
    async fn entries(&self, table: &str, snapshot: SnapshotId) -> Result<Vec<IndexEntry>>;
}

/// Table names are interpolated into SQL, so only plain identifiers are accepted.
pub(crate) fn validate_table_name(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if !valid {
        return InvalidTableSnafu { table }.fail();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("books_index").is_ok());
        assert!(validate_table_name("parquet_index2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("1books").is_err());
        assert!(validate_table_name("books; DROP TABLE x").is_err());
        assert!(validate_table_name("Books").is_err());
    }
}
