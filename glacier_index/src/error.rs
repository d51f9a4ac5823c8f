#[cfg(feature = "postgres")]
use std::sync::Arc;

use glacier_observability::ErrorKind;
use snafu::Snafu;

/// Errors returned by an [`IndexStore`](crate::IndexStore).
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum IndexStoreError {
    /// The store could not be reached or the operation was interrupted.
    #[snafu(display("index store unavailable: {message}"))]
    Unavailable { message: String },
    #[snafu(display("index store {operation} timed out"))]
    Timeout { operation: &'static str },
    #[snafu(display("{resource} not found: {message}"))]
    NotFound {
        resource: &'static str,
        message: String,
    },
    #[snafu(display("invalid table name '{table}'"))]
    InvalidTable { table: String },
    /// Data read back from the store does not decode.
    #[snafu(display("invalid data in table {table}: {message}"))]
    InvalidData { table: String, message: String },
    #[cfg(feature = "postgres")]
    #[snafu(display("database error during {operation}"))]
    Database {
        operation: &'static str,
        source: Arc<sqlx::Error>,
    },
}

pub type Result<T, E = IndexStoreError> = std::result::Result<T, E>;

impl IndexStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable { .. } | Self::Timeout { .. } => ErrorKind::Temporary,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidTable { .. } => ErrorKind::Configuration,
            Self::InvalidData { .. } => ErrorKind::Internal,
            #[cfg(feature = "postgres")]
            Self::Database { source, .. } => crate::postgres::classify(source),
        }
    }

    /// Returns true if retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Errors returned by the [`IndexWriter`](crate::IndexWriter).
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum IndexWriteError {
    /// The batch does not carry the indexed columns.
    #[snafu(display("cannot project index entries: {message}"))]
    Projection { message: String },
    /// The store kept failing, or failed permanently.
    #[snafu(display("index {operation} failed after {after_attempts} attempt(s)"))]
    IndexWriteFailed {
        operation: &'static str,
        after_attempts: u32,
        source: IndexStoreError,
    },
}

impl IndexWriteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Projection { .. } => ErrorKind::Validation,
            Self::IndexWriteFailed { source, .. } => source.kind(),
        }
    }
}
