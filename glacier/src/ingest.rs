use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use bytesize::ByteSize;
use clap::Args;
use glacier_ingestor_core::{
    BufferIngestor, FilenameSequencer, SpillDirectory, StreamRegistry, recover_spilled,
    run_background_ingestor,
};
use glacier_resources::{BookRecord, StreamName, book_schema, books_to_record_batch};
use glacier_worker::{CompactionScheduler, Compactor, run_compaction_scheduler};
use snafu::ResultExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    args::{IndexArgs, StorageArgs},
    error::{ArrowSnafu, IngestSnafu, IoSnafu, JoinSnafu, Result},
};

/// Ingest book records (JSON lines) through the buffer pipeline
#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Files with one JSON record per line. Reads stdin when empty.
    files: Vec<PathBuf>,
    /// Name of the stream the records belong to.
    #[arg(long, default_value = "books")]
    stream: StreamName,
    /// Live buffer size that triggers a cutover.
    #[arg(long, env = "GLACIER_THRESHOLD", default_value = "64MiB")]
    threshold: ByteSize,
    /// Base name of snapshot files. Defaults to `glacier_<pid>`.
    #[arg(long, env = "GLACIER_BASE_NAME")]
    base_name: Option<String>,
    /// Records converted to one Arrow batch per append.
    #[arg(long, default_value_t = 1000)]
    batch_size: usize,
    /// Directory keeping buffers that could not be uploaded.
    #[arg(long, env = "GLACIER_SPILL_DIR")]
    spill_dir: Option<PathBuf>,
    /// Compact the partition every N seconds while ingesting.
    #[arg(long)]
    compaction_interval: Option<u64>,
    #[clap(flatten)]
    storage: StorageArgs,
    #[clap(flatten)]
    index: IndexArgs,
}

#[derive(Debug, Default)]
struct InputStats {
    records: u64,
    skipped: u64,
}

impl IngestArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let pid = std::process::id();
        let base_name = self
            .base_name
            .clone()
            .unwrap_or_else(|| format!("glacier_{pid}"));

        let storage = self.storage.object_storage()?;
        let index_writer = self.index.writer(self.index.store().await?);
        let materializer = self.storage.materializer(
            storage,
            Arc::new(FilenameSequencer::default()),
            base_name,
        );

        let spill = match &self.spill_dir {
            Some(dir) => Some(
                SpillDirectory::open(dir.join(self.stream.as_str()))
                    .await
                    .context(IngestSnafu {})?,
            ),
            None => None,
        };

        if let Some(spill) = &spill {
            let recovered = recover_spilled(spill, &materializer, &index_writer)
                .await
                .context(IngestSnafu {})?;

            if !recovered.recovered.is_empty() {
                println!(
                    "Recovered {} spilled buffers ({} rows indexed)",
                    recovered.recovered.len(),
                    recovered.indexed_rows
                );
            }
        }

        let mut ingestor = BufferIngestor::new(
            self.stream.clone(),
            book_schema(),
            self.threshold.as_u64(),
            materializer.clone(),
            index_writer.clone(),
        );
        if let Some(spill) = spill {
            ingestor = ingestor.with_spill_directory(spill);
        }

        let registry = StreamRegistry::builder()
            .register(ingestor.client())
            .context(IngestSnafu {})?
            .build();

        // Cancelled once reading stops, so the pipeline sees every appended record.
        let pipeline_ct = CancellationToken::new();
        let pipeline = tokio::spawn(run_background_ingestor(ingestor, pipeline_ct.clone()));

        let scheduler = self.compaction_interval.map(|seconds| {
            let scheduler = CompactionScheduler::new(
                Compactor::new(materializer.clone(), index_writer.clone()),
                vec![self.storage.partition.clone()],
                Duration::from_secs(seconds.max(1)),
            );
            tokio::spawn(run_compaction_scheduler(scheduler, pipeline_ct.clone()))
        });

        let input = self.read_input(&registry, pid, &ct).await;

        for status in registry.status() {
            info!(
                stream = %status.stream,
                rows = status.row_count,
                size = %ByteSize::b(status.estimated_size),
                cutovers = status.cutovers,
                "Input consumed"
            );
        }

        pipeline_ct.cancel();
        let summary = pipeline
            .await
            .context(JoinSnafu {})?
            .context(IngestSnafu {})?;

        if let Some(scheduler) = scheduler {
            scheduler.await.context(JoinSnafu {})?;
        }

        let input = input?;

        println!(
            "Ingested {} records ({} skipped) into {} snapshots",
            input.records, input.skipped, summary.snapshots
        );
        println!(
            "Indexed {} rows, {} index failures, {} materialization failures",
            summary.indexed_rows, summary.index_failures, summary.materialization_failures
        );
        for path in &summary.spilled {
            println!("Spilled: {}", path.display());
        }

        Ok(())
    }

    async fn read_input(
        &self,
        registry: &StreamRegistry,
        pid: u32,
        ct: &CancellationToken,
    ) -> Result<InputStats> {
        let mut stats = InputStats::default();

        if self.files.is_empty() {
            let reader = BufReader::new(tokio::io::stdin());
            self.read_records(reader, Path::new("-"), registry, pid, ct, &mut stats)
                .await?;
            return Ok(stats);
        }

        for path in &self.files {
            let file = tokio::fs::File::open(path)
                .await
                .context(IoSnafu { path: path.clone() })?;
            self.read_records(BufReader::new(file), path, registry, pid, ct, &mut stats)
                .await?;
        }

        Ok(stats)
    }

    async fn read_records<R>(
        &self,
        reader: R,
        path: &Path,
        registry: &StreamRegistry,
        pid: u32,
        ct: &CancellationToken,
        stats: &mut InputStats,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut pending = Vec::with_capacity(self.batch_size);
        let mut line_number = 0u64;

        loop {
            let line = tokio::select! {
                biased;
                _ = ct.cancelled() => {
                    warn!(path = %path.display(), line_number, "Interrupted. Stopping input");
                    break;
                }
                line = lines.next_line() => line.context(IoSnafu { path: path.to_path_buf() })?,
            };

            let Some(line) = line else {
                break;
            };
            line_number += 1;

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<BookRecord>(&line) {
                Ok(record) => pending.push(record),
                Err(err) => {
                    warn!(path = %path.display(), line_number, err = %err, "Skipping invalid record");
                    stats.skipped += 1;
                    continue;
                }
            }

            if pending.len() >= self.batch_size.max(1) {
                stats.records += self.append(registry, &mut pending, pid)?;
            }
        }

        stats.records += self.append(registry, &mut pending, pid)?;

        Ok(())
    }

    fn append(
        &self,
        registry: &StreamRegistry,
        pending: &mut Vec<BookRecord>,
        pid: u32,
    ) -> Result<u64> {
        if pending.is_empty() {
            return Ok(0);
        }

        let batch = books_to_record_batch(pending, pid as i64).context(ArrowSnafu {})?;
        registry
            .extend(self.stream.as_str(), batch)
            .context(IngestSnafu {})?;

        let appended = pending.len() as u64;
        pending.clear();

        Ok(appended)
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Cli {
        #[clap(flatten)]
        args: IngestArgs,
    }

    #[test]
    fn test_defaults() {
        let Cli { args } = Cli::try_parse_from(["ingest"]).unwrap();

        assert!(args.files.is_empty());
        assert_eq!(args.stream.as_str(), "books");
        assert_eq!(args.threshold.as_u64(), 64 * 1024 * 1024);
        assert_eq!(args.storage.partition.as_str(), "daily");
        assert_eq!(args.storage.bucket.as_str(), "daily");
        assert_eq!(args.storage.storage_retry_attempts, 3);
        assert_eq!(args.index.index_table, "books_index");
        assert_eq!(args.index.snapshot_table, "parquet_index");
        assert_eq!(args.index.index_retry_attempts, 7);
        assert_eq!(args.index.index_retry_delay_ms, 1000);
        assert!(args.compaction_interval.is_none());
    }

    #[test]
    fn test_flags() {
        let Cli { args } = Cli::try_parse_from([
            "ingest",
            "--threshold",
            "1KiB",
            "--partition",
            "weekly",
            "--base-name",
            "books",
            "a.jsonl",
            "b.jsonl",
        ])
        .unwrap();

        assert_eq!(args.threshold.as_u64(), 1024);
        assert_eq!(args.storage.partition.as_str(), "weekly");
        assert_eq!(args.base_name.as_deref(), Some("books"));
        assert_eq!(args.files.len(), 2);
    }

    #[test]
    fn test_invalid_partition_is_rejected() {
        assert!(Cli::try_parse_from(["ingest", "--partition", "Not Valid"]).is_err());
    }
}
