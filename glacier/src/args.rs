use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Args;
use glacier_index::{
    DEFAULT_INDEX_TABLE, DEFAULT_SNAPSHOT_TABLE, InMemoryIndexStore, IndexStore, IndexTables,
    IndexWriter,
};
use glacier_ingestor_core::{FilenameSequencer, SnapshotMaterializer};
use glacier_object_store::{
    FactoryObjectStorage, LocalFileSystemFactory, ObjectStorage, ObjectStoreFactory,
    S3CompatibleConfiguration, S3CompatibleFactory, TemporaryFileSystemFactory,
};
use glacier_resources::{BucketName, PartitionName, RetryPolicy};
use snafu::ResultExt;
use tracing::{info, warn};

use crate::error::{InvalidArgumentSnafu, IoSnafu, ObjectStoreSnafu, Result};

/// Where snapshots are stored.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Bucket holding the snapshots.
    #[arg(long, env = "GLACIER_BUCKET", default_value = "daily")]
    pub bucket: BucketName,
    /// Partition (key prefix) of the snapshots.
    #[arg(long, env = "GLACIER_PARTITION", default_value = "daily")]
    pub partition: PartitionName,
    /// Local directory used as object storage. A temporary directory is used
    /// when neither this nor an S3 endpoint is set.
    #[arg(long, env = "GLACIER_STORAGE_ROOT")]
    pub storage_root: Option<PathBuf>,
    /// Endpoint of an S3-compatible service.
    #[arg(long, env = "GLACIER_S3_ENDPOINT", conflicts_with = "storage_root")]
    pub s3_endpoint: Option<String>,
    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    pub s3_key: Option<String>,
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub s3_secret: Option<String>,
    #[arg(long, env = "AWS_DEFAULT_REGION")]
    pub s3_region: Option<String>,
    /// Upload attempts per snapshot before the buffer is spilled.
    #[arg(long, default_value_t = 3)]
    pub storage_retry_attempts: u32,
}

impl StorageArgs {
    pub fn object_storage(&self) -> Result<Arc<dyn ObjectStorage>> {
        let factory: Arc<dyn ObjectStoreFactory> = match (&self.s3_endpoint, &self.storage_root) {
            (Some(endpoint), _) => {
                let (Some(access_key_id), Some(secret_access_key)) =
                    (&self.s3_key, &self.s3_secret)
                else {
                    return InvalidArgumentSnafu {
                        name: "s3-endpoint",
                        message: "--s3-key and --s3-secret are required",
                    }
                    .fail();
                };

                info!(%endpoint, bucket = %self.bucket, "Using S3-compatible storage");

                Arc::new(S3CompatibleFactory::new(S3CompatibleConfiguration {
                    endpoint: endpoint.clone(),
                    access_key_id: access_key_id.clone(),
                    secret_access_key: secret_access_key.clone(),
                    region: self.s3_region.clone(),
                    allow_http: endpoint.starts_with("http://"),
                }))
            }
            (None, Some(root)) => {
                std::fs::create_dir_all(root).context(IoSnafu { path: root.clone() })?;
                let factory = LocalFileSystemFactory::new(root).context(ObjectStoreSnafu {})?;

                info!(root = %factory.root_path().display(), "Using local storage");

                Arc::new(factory)
            }
            (None, None) => {
                let factory = TemporaryFileSystemFactory::new().context(ObjectStoreSnafu {})?;

                warn!(
                    root = %factory.root_path().display(),
                    "No storage configured. Snapshots go to a temporary directory removed on exit"
                );

                Arc::new(factory)
            }
        };

        Ok(Arc::new(FactoryObjectStorage::new(factory)))
    }

    pub fn materializer(
        &self,
        storage: Arc<dyn ObjectStorage>,
        sequencer: Arc<FilenameSequencer>,
        base_name: impl Into<String>,
    ) -> SnapshotMaterializer {
        SnapshotMaterializer::new(
            storage,
            sequencer,
            self.bucket.clone(),
            self.partition.clone(),
            base_name,
        )
        .with_retry_policy(RetryPolicy::exponential(
            self.storage_retry_attempts,
            Duration::from_millis(200),
            Duration::from_secs(5),
        ))
    }
}

/// Where the snapshot index is kept.
#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    /// Table with one row per indexed record.
    #[arg(long, env = "GLACIER_INDEX_TABLE", default_value = DEFAULT_INDEX_TABLE)]
    pub index_table: String,
    /// Table with one row per snapshot.
    #[arg(long, env = "GLACIER_SNAPSHOT_TABLE", default_value = DEFAULT_SNAPSHOT_TABLE)]
    pub snapshot_table: String,
    #[arg(long, default_value_t = 7)]
    pub index_retry_attempts: u32,
    #[arg(long, default_value_t = 1000)]
    pub index_retry_delay_ms: u64,
    /// PostgreSQL connection string. The index is kept in memory when unset.
    #[cfg(feature = "postgres")]
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,
}

impl IndexArgs {
    pub fn tables(&self) -> IndexTables {
        IndexTables {
            snapshots: self.snapshot_table.clone(),
            entries: self.index_table.clone(),
        }
    }

    pub async fn store(&self) -> Result<Arc<dyn IndexStore>> {
        #[cfg(feature = "postgres")]
        if let Some(url) = &self.database_url {
            use crate::error::IndexStoreSnafu;

            let store = glacier_index::PostgresIndexStore::connect(url)
                .await
                .context(IndexStoreSnafu {
                    operation: "connect",
                })?;
            store
                .ensure_tables(&self.tables())
                .await
                .context(IndexStoreSnafu {
                    operation: "create tables",
                })?;

            info!("Using PostgreSQL index");

            return Ok(Arc::new(store));
        }

        warn!("No database configured. The index is kept in memory and lost on exit");

        Ok(Arc::new(InMemoryIndexStore::new()))
    }

    pub fn writer(&self, store: Arc<dyn IndexStore>) -> IndexWriter {
        IndexWriter::new(store, self.tables()).with_retry_policy(RetryPolicy::fixed(
            self.index_retry_attempts,
            Duration::from_millis(self.index_retry_delay_ms),
        ))
    }
}
