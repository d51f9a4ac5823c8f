use std::{path::PathBuf, sync::Arc};

use clap::Args;
use glacier_ingestor_core::{FilenameSequencer, SpillDirectory, recover_spilled};
use glacier_resources::StreamName;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use crate::{
    args::{IndexArgs, StorageArgs},
    error::{IngestSnafu, Result},
};

/// Upload and index buffers spilled by an earlier run
#[derive(Debug, Args)]
pub struct RecoverArgs {
    /// Directory the buffers were spilled to.
    #[arg(long, env = "GLACIER_SPILL_DIR")]
    spill_dir: PathBuf,
    /// Stream whose spilled buffers are recovered.
    #[arg(long, default_value = "books")]
    stream: StreamName,
    /// Base name of the recovered snapshot files. Defaults to `glacier_<pid>`.
    #[arg(long, env = "GLACIER_BASE_NAME")]
    base_name: Option<String>,
    #[clap(flatten)]
    storage: StorageArgs,
    #[clap(flatten)]
    index: IndexArgs,
}

impl RecoverArgs {
    pub async fn run(self, _ct: CancellationToken) -> Result<()> {
        let base_name = self
            .base_name
            .clone()
            .unwrap_or_else(|| format!("glacier_{}", std::process::id()));

        let storage = self.storage.object_storage()?;
        let index_writer = self.index.writer(self.index.store().await?);
        let materializer = self.storage.materializer(
            storage,
            Arc::new(FilenameSequencer::default()),
            base_name,
        );

        let spill = SpillDirectory::open(self.spill_dir.join(self.stream.as_str()))
            .await
            .context(IngestSnafu {})?;

        let summary = recover_spilled(&spill, &materializer, &index_writer)
            .await
            .context(IngestSnafu {})?;

        for snapshot in &summary.recovered {
            println!("{} ({} rows)", snapshot.path, snapshot.row_count);
        }
        println!(
            "Recovered {} buffers, indexed {} rows, {} index failures",
            summary.recovered.len(),
            summary.indexed_rows,
            summary.index_failures
        );

        Ok(())
    }
}
