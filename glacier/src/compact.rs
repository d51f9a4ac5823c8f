use std::sync::Arc;

use clap::Args;
use glacier_ingestor_core::FilenameSequencer;
use glacier_resources::{COMPACTED_BASE_NAME, PartitionName};
use glacier_worker::Compactor;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use crate::{
    args::{IndexArgs, StorageArgs},
    error::{Result, WorkerSnafu},
};

/// Merge the snapshots of one or more partitions
#[derive(Debug, Args)]
pub struct CompactArgs {
    /// Partitions to compact. Defaults to `--partition`.
    partitions: Vec<PartitionName>,
    #[clap(flatten)]
    storage: StorageArgs,
    #[clap(flatten)]
    index: IndexArgs,
}

impl CompactArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let storage = self.storage.object_storage()?;
        let index_writer = self.index.writer(self.index.store().await?);
        let materializer = self.storage.materializer(
            storage,
            Arc::new(FilenameSequencer::default()),
            COMPACTED_BASE_NAME,
        );
        let compactor = Compactor::new(materializer, index_writer);

        let partitions = if self.partitions.is_empty() {
            vec![self.storage.partition.clone()]
        } else {
            self.partitions.clone()
        };

        for partition in &partitions {
            if ct.is_cancelled() {
                break;
            }

            match compactor.compact(partition).await.context(WorkerSnafu {})? {
                Some(snapshot) => println!(
                    "{}: {} ({} rows, {} bytes)",
                    partition, snapshot.path, snapshot.row_count, snapshot.size_bytes
                ),
                None => println!("{partition}: empty"),
            }
        }

        Ok(())
    }
}
