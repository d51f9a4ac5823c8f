use std::path::PathBuf;

use arrow::error::ArrowError;
use glacier_index::IndexStoreError;
use glacier_ingestor_core::IngestorError;
use glacier_observability::{ErrorKind, ObservabilityError};
use glacier_worker::WorkerError;
use snafu::Snafu;

/// CLI error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    #[snafu(display("Invalid {name} argument: {message}"))]
    InvalidArgument { name: &'static str, message: String },
    #[snafu(display("Failed to set up logging"))]
    Observability { source: ObservabilityError },
    #[snafu(display("Object store error"))]
    ObjectStore { source: object_store::Error },
    #[snafu(display("Failed to read {}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to convert records to Arrow"))]
    Arrow { source: ArrowError },
    #[snafu(display("Ingestion error"))]
    Ingest { source: IngestorError },
    #[snafu(display("Worker error"))]
    Worker { source: WorkerError },
    #[snafu(display("Failed index store operation {operation}"))]
    IndexStore {
        operation: &'static str,
        source: IndexStoreError,
    },
    #[snafu(display("Background task failed"))]
    Join { source: tokio::task::JoinError },
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;

impl CliError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } | Self::Observability { .. } => ErrorKind::Configuration,
            Self::ObjectStore { .. } => ErrorKind::Configuration,
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ErrorKind::NotFound
            }
            Self::Io { .. } => ErrorKind::Temporary,
            Self::Arrow { .. } => ErrorKind::Validation,
            Self::Ingest { source } => source.kind(),
            Self::Worker { source } => source.kind(),
            Self::IndexStore { source, .. } => source.kind(),
            Self::Join { .. } => ErrorKind::Internal,
        }
    }
}
