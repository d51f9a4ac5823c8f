//! Upload of spilled buffers left behind by an earlier run.

use glacier_index::IndexWriter;
use glacier_resources::Snapshot;
use tracing::{info, warn};

use crate::{
    error::Result, ingestor::index_snapshot, materializer::SnapshotMaterializer,
    spill::SpillDirectory,
};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoverySummary {
    /// Snapshots created from spill files, oldest spill file first.
    pub recovered: Vec<Snapshot>,
    pub indexed_rows: u64,
    /// Recovered snapshots whose index write failed.
    pub index_failures: u64,
}

/// Materializes and indexes every spill file, removing each file once its
/// snapshot is durable.
///
/// Stops at the first spill file that cannot be read or uploaded; that file
/// and the ones after it stay in place for the next attempt.
pub async fn recover_spilled(
    spill: &SpillDirectory,
    materializer: &SnapshotMaterializer,
    index_writer: &IndexWriter,
) -> Result<RecoverySummary> {
    let mut summary = RecoverySummary::default();

    for path in spill.list().await? {
        let file = spill.read(&path).await?;

        info!(path = %path.display(), rows = file.row_count(), "Recovering spilled buffer");

        let snapshot = materializer
            .write_snapshot(materializer.base_name(), &file)
            .await?;

        match index_snapshot(index_writer, &snapshot, &file.batches).await {
            Some(rows) => summary.indexed_rows += rows,
            None => {
                warn!(snapshot = %snapshot.path, "Recovered snapshot is not indexed");
                summary.index_failures += 1;
            }
        }

        spill.remove(&path).await?;
        summary.recovered.push(snapshot);
    }

    if !summary.recovered.is_empty() {
        info!(
            snapshots = summary.recovered.len(),
            spill_dir = %spill.root().display(),
            "Spilled buffers recovered"
        );
    }

    Ok(summary)
}
