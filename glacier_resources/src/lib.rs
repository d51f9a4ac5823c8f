pub mod book;
pub mod name;
pub mod retry;
mod snapshot;

pub use self::{
    book::{BookRecord, book_schema, books_to_record_batch, fingerprint},
    name::{BucketName, PartitionName, ResourceError, ResourceResult, StreamName},
    retry::{Backoff, RetryError, RetryPolicy, retry_with_policy},
    snapshot::{
        COMPACTED_BASE_NAME, SNAPSHOT_EXTENSION, Snapshot, SnapshotId, SnapshotRef,
        is_consolidated_name, snapshot_order_key,
    },
};
