use clap::Args;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use crate::{
    args::{IndexArgs, StorageArgs},
    error::{Result, WorkerSnafu},
};

/// Compare stored snapshots with the index
#[derive(Debug, Args)]
pub struct ReconcileArgs {
    #[clap(flatten)]
    storage: StorageArgs,
    #[clap(flatten)]
    index: IndexArgs,
}

impl ReconcileArgs {
    pub async fn run(self, _ct: CancellationToken) -> Result<()> {
        let storage = self.storage.object_storage()?;
        let index = self.index.store().await?;

        let report = glacier_worker::reconcile(
            storage.as_ref(),
            &self.storage.bucket,
            index.as_ref(),
            &self.index.tables(),
            &self.storage.partition,
        )
        .await
        .context(WorkerSnafu {})?;

        for path in &report.unindexed {
            println!("unindexed\t{path}");
        }
        for snapshot in &report.missing {
            println!("missing\t{}\t{}", snapshot.snapshot.path, snapshot.id);
        }
        for mismatch in &report.mismatched {
            println!(
                "mismatched\t{}\t{} rows\t{} index rows",
                mismatch.snapshot.snapshot.path,
                mismatch.snapshot.snapshot.row_count,
                mismatch.entries
            );
        }

        if report.is_consistent() {
            println!(
                "{}: {} snapshots, consistent",
                report.partition,
                report.indexed.len()
            );
        } else {
            println!(
                "{}: {} indexed, {} unindexed, {} missing, {} mismatched",
                report.partition,
                report.indexed.len(),
                report.unindexed.len(),
                report.missing.len(),
                report.mismatched.len()
            );
        }

        Ok(())
    }
}
