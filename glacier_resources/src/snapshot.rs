use std::fmt;

use chrono::{DateTime, Utc};

use crate::PartitionName;

/// File extension of snapshot files.
pub const SNAPSHOT_EXTENSION: &str = "parquet";

/// Base name used for the output of compaction.
pub const COMPACTED_BASE_NAME: &str = "compacted";

/// Identifier assigned to a snapshot by the index store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotId(pub i64);

/// An immutable columnar file written once to durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// The sequenced file name, e.g. `glacier_20240101_001.parquet`.
    pub name: String,
    /// The partition the snapshot belongs to.
    pub partition: PartitionName,
    /// The object key inside the bucket.
    pub path: String,
    /// Number of rows in the snapshot.
    pub row_count: u64,
    /// Size of the file in bytes.
    pub size_bytes: u64,
    /// When the snapshot was uploaded.
    pub created_at: DateTime<Utc>,
}

/// Back-reference from index rows to a registered snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotRef {
    pub id: SnapshotId,
    pub path: String,
}

/// Returns true if the file name belongs to a compaction output.
pub fn is_consolidated_name(name: &str) -> bool {
    name.strip_prefix(COMPACTED_BASE_NAME)
        .is_some_and(|rest| rest.starts_with('_'))
}

/// Sort key of a snapshot name: base name, date, then the numeric sequence.
///
/// Sequences wider than three digits sort after narrower ones, so
/// `x_20240115_1000` follows `x_20240115_999`. Names that don't have the
/// `{base}_{YYYYMMDD}_{seq}` form sort by their full text.
pub fn snapshot_order_key(name: &str) -> (&str, &str, u64) {
    let stem = name
        .strip_suffix(SNAPSHOT_EXTENSION)
        .and_then(|stem| stem.strip_suffix('.'))
        .unwrap_or(name);

    let parsed = stem.rsplit_once('_').and_then(|(rest, seq)| {
        let (base, date) = rest.rsplit_once('_')?;
        let is_date = date.len() == 8 && date.bytes().all(|b| b.is_ascii_digit());
        let is_seq = !seq.is_empty() && seq.bytes().all(|b| b.is_ascii_digit());

        if !is_date || !is_seq {
            return None;
        }

        Some((base, date, seq.parse().ok()?))
    });

    parsed.unwrap_or((name, "", 0))
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
