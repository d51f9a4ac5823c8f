use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use glacier_observability::ErrorKind;
use glacier_resources::BucketName;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, path::Path};
use snafu::Snafu;
use tracing::debug;

use crate::ObjectStoreFactory;

/// Storage error types.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// The client for the bucket could not be created.
    #[snafu(display("failed to create object store client for bucket {bucket}"))]
    Client {
        bucket: BucketName,
        source: Arc<object_store::Error>,
    },
    /// A create-only write found an existing object.
    #[snafu(display("object {key} already exists in bucket {bucket}"))]
    AlreadyExists { bucket: BucketName, key: String },
    #[snafu(display("object {key} not found in bucket {bucket}"))]
    NotFound { bucket: BucketName, key: String },
    #[snafu(display("invalid object key {key}"))]
    InvalidKey {
        key: String,
        source: Arc<object_store::path::Error>,
    },
    #[snafu(display("object store {operation} failed for {bucket}/{key}"))]
    ObjectStore {
        operation: &'static str,
        bucket: BucketName,
        key: String,
        source: Arc<object_store::Error>,
    },
    #[snafu(display("object store {operation} timed out for {bucket}/{key}"))]
    Timeout {
        operation: &'static str,
        bucket: BucketName,
        key: String,
    },
}

pub type StorageResult<T, E = StorageError> = std::result::Result<T, E>;

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Temporary,
            Self::ObjectStore { source, .. } => match source.as_ref() {
                object_store::Error::Generic { .. } => ErrorKind::Temporary,
                object_store::Error::PermissionDenied { .. }
                | object_store::Error::Unauthenticated { .. } => ErrorKind::Configuration,
                _ => ErrorKind::Internal,
            },
            Self::Client { .. } => ErrorKind::Configuration,
            Self::AlreadyExists { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidKey { .. } => ErrorKind::Validation,
        }
    }

    /// Returns true if retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Bucket-level access to object storage.
///
/// Writes are create-only: an existing object is never overwritten.
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Writes a new object. Fails with [`StorageError::AlreadyExists`] if the key is taken.
    async fn put(&self, bucket: &BucketName, key: &str, data: Bytes) -> StorageResult<()>;

    async fn get(&self, bucket: &BucketName, key: &str) -> StorageResult<Bytes>;

    /// Lists the keys under the prefix, sorted lexicographically.
    async fn list(&self, bucket: &BucketName, prefix: &str) -> StorageResult<Vec<String>>;

    async fn delete(&self, bucket: &BucketName, key: &str) -> StorageResult<()>;

    async fn exists(&self, bucket: &BucketName, key: &str) -> StorageResult<bool>;
}

/// [`ObjectStorage`] implementation backed by an [`ObjectStoreFactory`].
#[derive(Clone)]
pub struct FactoryObjectStorage {
    factory: Arc<dyn ObjectStoreFactory>,
}

impl FactoryObjectStorage {
    pub fn new(factory: Arc<dyn ObjectStoreFactory>) -> Self {
        Self { factory }
    }

    async fn store(&self, bucket: &BucketName) -> StorageResult<Arc<dyn ObjectStore>> {
        self.factory
            .create_object_store(bucket)
            .await
            .map_err(|err| StorageError::Client {
                bucket: bucket.clone(),
                source: Arc::new(err),
            })
    }
}

fn parse_key(key: &str) -> StorageResult<Path> {
    Path::parse(key).map_err(|err| StorageError::InvalidKey {
        key: key.to_string(),
        source: Arc::new(err),
    })
}

fn map_error(
    operation: &'static str,
    bucket: &BucketName,
    key: &str,
    err: object_store::Error,
) -> StorageError {
    match err {
        object_store::Error::AlreadyExists { .. } => StorageError::AlreadyExists {
            bucket: bucket.clone(),
            key: key.to_string(),
        },
        object_store::Error::NotFound { .. } => StorageError::NotFound {
            bucket: bucket.clone(),
            key: key.to_string(),
        },
        err => StorageError::ObjectStore {
            operation,
            bucket: bucket.clone(),
            key: key.to_string(),
            source: Arc::new(err),
        },
    }
}

#[async_trait::async_trait]
impl ObjectStorage for FactoryObjectStorage {
    async fn put(&self, bucket: &BucketName, key: &str, data: Bytes) -> StorageResult<()> {
        let path = parse_key(key)?;
        let store = self.store(bucket).await?;

        store
            .put_opts(
                &path,
                PutPayload::from_bytes(data),
                PutOptions {
                    mode: PutMode::Create,
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| map_error("put", bucket, key, err))?;

        debug!(%bucket, key, "Object written");

        Ok(())
    }

    async fn get(&self, bucket: &BucketName, key: &str) -> StorageResult<Bytes> {
        let path = parse_key(key)?;
        let store = self.store(bucket).await?;

        let result = store
            .get(&path)
            .await
            .map_err(|err| map_error("get", bucket, key, err))?;

        result
            .bytes()
            .await
            .map_err(|err| map_error("get", bucket, key, err))
    }

    async fn list(&self, bucket: &BucketName, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix = prefix.trim_end_matches('/');
        let prefix_path = if prefix.is_empty() {
            None
        } else {
            Some(parse_key(prefix)?)
        };
        let store = self.store(bucket).await?;

        let objects: Vec<_> = store
            .list(prefix_path.as_ref())
            .try_collect()
            .await
            .map_err(|err| map_error("list", bucket, prefix, err))?;

        let mut keys: Vec<String> = objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect();
        keys.sort();

        Ok(keys)
    }

    async fn delete(&self, bucket: &BucketName, key: &str) -> StorageResult<()> {
        let path = parse_key(key)?;
        let store = self.store(bucket).await?;

        store
            .delete(&path)
            .await
            .map_err(|err| map_error("delete", bucket, key, err))?;

        debug!(%bucket, key, "Object deleted");

        Ok(())
    }

    async fn exists(&self, bucket: &BucketName, key: &str) -> StorageResult<bool> {
        let path = parse_key(key)?;
        let store = self.store(bucket).await?;

        match store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(map_error("head", bucket, key, err)),
        }
    }
}
