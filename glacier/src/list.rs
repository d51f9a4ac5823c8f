use std::collections::HashMap;

use clap::Args;
use glacier_worker::list_snapshot_paths;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use crate::{
    args::{IndexArgs, StorageArgs},
    error::{IndexStoreSnafu, Result, WorkerSnafu},
};

/// List the snapshots of a partition
#[derive(Debug, Args)]
pub struct ListArgs {
    #[clap(flatten)]
    storage: StorageArgs,
    #[clap(flatten)]
    index: IndexArgs,
}

impl ListArgs {
    pub async fn run(self, _ct: CancellationToken) -> Result<()> {
        let storage = self.storage.object_storage()?;
        let index = self.index.store().await?;

        let paths = list_snapshot_paths(
            storage.as_ref(),
            &self.storage.bucket,
            &self.storage.partition,
        )
        .await
        .context(WorkerSnafu {})?;

        let registered: HashMap<_, _> = index
            .list_snapshots(&self.index.tables().snapshots, &self.storage.partition)
            .await
            .context(IndexStoreSnafu {
                operation: "list_snapshots",
            })?
            .into_iter()
            .map(|snapshot| (snapshot.snapshot.path.clone(), snapshot))
            .collect();

        println!("PATH\tID\tROWS\tBYTES");
        for path in &paths {
            match registered.get(path) {
                Some(snapshot) => println!(
                    "{}\t{}\t{}\t{}",
                    path, snapshot.id, snapshot.snapshot.row_count, snapshot.snapshot.size_bytes
                ),
                None => println!("{path}\t-\t-\t-"),
            }
        }

        Ok(())
    }
}
