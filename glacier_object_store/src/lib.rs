//! Object store access for snapshot files.
//!
//! The [`ObjectStoreFactory`] trait creates `ObjectStore` clients for a bucket.
//! Implementations exist for the local file system, a temporary directory and
//! S3-compatible services.
//!
//! The rest of the workspace talks to storage through the narrower
//! [`ObjectStorage`] trait (put/get/list/delete/exists on a bucket), which
//! [`FactoryObjectStorage`] implements on top of a factory.

pub mod cloud;
pub mod local;
pub mod paths;
mod storage;

use std::sync::Arc;

use glacier_resources::BucketName;
use object_store::ObjectStore;

pub use self::{
    cloud::{S3CompatibleConfiguration, S3CompatibleFactory},
    local::{LocalFileSystemFactory, TemporaryFileSystemFactory},
    storage::{FactoryObjectStorage, ObjectStorage, StorageError, StorageResult},
};

/// Factory trait for creating ObjectStore instances for a bucket.
#[async_trait::async_trait]
pub trait ObjectStoreFactory: Send + Sync {
    /// Create an ObjectStore instance scoped to the given bucket.
    async fn create_object_store(
        &self,
        bucket: &BucketName,
    ) -> Result<Arc<dyn ObjectStore>, object_store::Error>;
}
