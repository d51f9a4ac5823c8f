use glacier_index::{IndexStoreError, IndexWriteError};
use glacier_ingestor_core::IngestorError;
use glacier_object_store::StorageError;
use glacier_observability::ErrorKind;
use glacier_resources::PartitionName;
use snafu::Snafu;

/// Errors that can occur while compacting or reconciling a partition.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum WorkerError {
    #[snafu(display("Failed object storage operation {operation} in partition {partition}"))]
    Storage {
        operation: &'static str,
        partition: PartitionName,
        source: StorageError,
    },
    #[snafu(display("Failed to read snapshot {path}"))]
    ReadSnapshot { path: String, source: IngestorError },
    #[snafu(display("Failed to merge snapshots of partition {partition}"))]
    Merge {
        partition: PartitionName,
        source: IngestorError,
    },
    #[snafu(display("Failed to write consolidated snapshot of partition {partition}"))]
    WriteSnapshot {
        partition: PartitionName,
        source: IngestorError,
    },
    #[snafu(display("Failed index operation {operation}"))]
    Index {
        operation: &'static str,
        source: IndexWriteError,
    },
    #[snafu(display("Failed to list indexed snapshots of partition {partition}"))]
    IndexStore {
        partition: PartitionName,
        source: IndexStoreError,
    },
}

pub type Result<T, E = WorkerError> = std::result::Result<T, E>;

impl WorkerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage { source, .. } => source.kind(),
            Self::ReadSnapshot { source, .. }
            | Self::Merge { source, .. }
            | Self::WriteSnapshot { source, .. } => source.kind(),
            Self::Index { source, .. } => source.kind(),
            Self::IndexStore { source, .. } => source.kind(),
        }
    }
}
