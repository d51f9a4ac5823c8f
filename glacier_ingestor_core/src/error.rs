use std::sync::Arc;

use arrow::error::ArrowError;
use glacier_index::IndexWriteError;
use glacier_object_store::StorageError;
use glacier_observability::ErrorKind;
use glacier_resources::StreamName;
use parquet::errors::ParquetError;
use snafu::Snafu;

/// Ingestor error types.
///
/// The message associated with an error is reported to the caller, for this
/// reason it should contain information that is useful to the user.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum IngestorError {
    /// The batch does not match the stream schema. Never retried.
    #[snafu(display("schema mismatch: {message}"))]
    SchemaMismatch { message: String },
    #[snafu(display("arrow error: {message}"))]
    Arrow {
        message: &'static str,
        #[snafu(source(from(ArrowError, Arc::new)))]
        source: Arc<ArrowError>,
    },
    #[snafu(display("parquet error: {message}"))]
    Parquet {
        message: &'static str,
        #[snafu(source(from(ParquetError, Arc::new)))]
        source: Arc<ParquetError>,
    },
    /// The snapshot could not be written to object storage.
    ///
    /// The buffer that was being materialized is kept by the caller.
    #[snafu(display("failed to materialize snapshot {name} after {attempts} attempt(s)"))]
    MaterializationFailed {
        name: String,
        attempts: u32,
        source: StorageError,
    },
    #[snafu(display("object storage error: {message}"))]
    Storage {
        message: &'static str,
        source: StorageError,
    },
    #[snafu(display("index error"))]
    Index { source: IndexWriteError },
    #[snafu(display("spill directory error: {message}"))]
    Spill {
        message: String,
        #[snafu(source(from(std::io::Error, Arc::new)))]
        source: Arc<std::io::Error>,
    },
    #[snafu(display("unknown stream {stream}"))]
    UnknownStream { stream: String },
    #[snafu(display("stream {stream} is already registered"))]
    DuplicateStream { stream: StreamName },
    /// The background pipeline of the stream is no longer running.
    #[snafu(display("pipeline for stream {stream} is closed"))]
    PipelineClosed { stream: StreamName },
}

pub type Result<T, E = IngestorError> = std::result::Result<T, E>;

impl IngestorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SchemaMismatch { .. } | Self::UnknownStream { .. } => ErrorKind::Validation,
            Self::DuplicateStream { .. } => ErrorKind::Configuration,
            Self::Arrow { .. } | Self::Parquet { .. } | Self::PipelineClosed { .. } => {
                ErrorKind::Internal
            }
            Self::MaterializationFailed { source, .. } | Self::Storage { source, .. } => {
                source.kind()
            }
            Self::Index { source } => source.kind(),
            Self::Spill { .. } => ErrorKind::Temporary,
        }
    }
}
