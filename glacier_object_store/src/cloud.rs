//! S3-compatible object store factory.
//!
//! Creates one `AmazonS3` client per bucket against a configurable endpoint
//! (AWS, MinIO, localstack, ...). Clients are cached since building one sets
//! up an HTTP connection pool.

use std::sync::Arc;

use dashmap::DashMap;
use glacier_resources::BucketName;
use object_store::{
    Error as ObjectStoreError, ObjectStore,
    aws::{AmazonS3Builder, S3CopyIfNotExists},
};

use crate::ObjectStoreFactory;

/// Connection parameters for an S3-compatible service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3CompatibleConfiguration {
    /// Endpoint URL, e.g. `http://localhost:9000`.
    pub endpoint: String,
    /// `AWS_ACCESS_KEY_ID`
    pub access_key_id: String,
    /// `AWS_SECRET_ACCESS_KEY`
    pub secret_access_key: String,
    /// `AWS_DEFAULT_REGION`
    pub region: Option<String>,
    /// Allow plain HTTP endpoints.
    pub allow_http: bool,
}

/// Factory for S3-compatible object stores.
pub struct S3CompatibleFactory {
    config: S3CompatibleConfiguration,
    stores: DashMap<BucketName, Arc<dyn ObjectStore>>,
}

impl S3CompatibleFactory {
    pub fn new(config: S3CompatibleConfiguration) -> Self {
        Self {
            config,
            stores: DashMap::new(),
        }
    }

    fn build_store(&self, bucket: &BucketName) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket.as_str())
            .with_access_key_id(&self.config.access_key_id)
            .with_secret_access_key(&self.config.secret_access_key)
            .with_endpoint(&self.config.endpoint)
            .with_copy_if_not_exists(S3CopyIfNotExists::Multipart)
            .with_allow_http(self.config.allow_http);

        if let Some(region) = &self.config.region {
            builder = builder.with_region(region);
        }

        Ok(Arc::new(builder.build()?))
    }
}

#[async_trait::async_trait]
impl ObjectStoreFactory for S3CompatibleFactory {
    async fn create_object_store(
        &self,
        bucket: &BucketName,
    ) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
        if let Some(store) = self.stores.get(bucket) {
            return Ok(store.clone());
        }

        let store = self.build_store(bucket)?;
        self.stores.insert(bucket.clone(), store.clone());

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3CompatibleConfiguration {
        S3CompatibleConfiguration {
            endpoint: "http://localhost:9000".to_string(),
            access_key_id: "minio".to_string(),
            secret_access_key: "minio123".to_string(),
            region: Some("us-east-1".to_string()),
            allow_http: true,
        }
    }

    #[tokio::test]
    async fn test_stores_are_cached_per_bucket() {
        let factory = S3CompatibleFactory::new(config());
        let daily = BucketName::new_unchecked("daily");

        let first = factory.create_object_store(&daily).await.unwrap();
        let second = factory.create_object_store(&daily).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = factory
            .create_object_store(&BucketName::new_unchecked("other"))
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
    }
}
