//! The ingestion pipeline of one stream.
//!
//! [`BufferIngestorClient::extend`] appends to the live buffer synchronously.
//! When a cutover happens the sealed buffer is sent to the background
//! [`BufferIngestor`], which materializes sealed buffers one at a time in
//! cutover order, then registers and indexes the resulting snapshot.
//!
//! An acknowledged `extend` means the rows are in the live buffer, not that
//! they are durable.

use std::{path::PathBuf, sync::Arc};

use arrow::{array::RecordBatch, datatypes::SchemaRef};
use bytesize::ByteSize;
use glacier_index::IndexWriter;
use glacier_observability::KeyValue;
use glacier_resources::{Snapshot, StreamName};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    buffer::estimate_batch_size,
    error::Result,
    manager::{BufferManager, BufferStatus, SealedBuffer},
    materializer::SnapshotMaterializer,
    metrics::IngestionMetrics,
    spill::SpillDirectory,
};

/// Acknowledgement of an `extend` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Rows appended to the live buffer.
    pub rows: usize,
    /// Sequence number of the buffer sealed by this call, if any.
    pub cutover: Option<u64>,
}

/// What the background pipeline did before it stopped.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub snapshots: u64,
    pub rows: u64,
    pub indexed_rows: u64,
    pub materialization_failures: u64,
    pub index_failures: u64,
    pub spilled: Vec<PathBuf>,
}

pub struct BufferIngestor {
    manager: Arc<BufferManager>,
    rx: mpsc::UnboundedReceiver<SealedBuffer>,
    materializer: SnapshotMaterializer,
    index_writer: IndexWriter,
    spill: Option<SpillDirectory>,
    metrics: Arc<IngestionMetrics>,
}

#[derive(Clone)]
pub struct BufferIngestorClient {
    manager: Arc<BufferManager>,
    metrics: Arc<IngestionMetrics>,
}

pub async fn run_background_ingestor(
    ingestor: BufferIngestor,
    ct: CancellationToken,
) -> Result<PipelineSummary> {
    ingestor.run(ct).await
}

impl BufferIngestor {
    pub fn new(
        stream: StreamName,
        schema: SchemaRef,
        threshold: u64,
        materializer: SnapshotMaterializer,
        index_writer: IndexWriter,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            manager: Arc::new(BufferManager::new(stream, schema, threshold, tx)),
            rx,
            materializer,
            index_writer,
            spill: None,
            metrics: Arc::new(IngestionMetrics::default()),
        }
    }

    /// Keeps buffers that fail to materialize in the spill directory.
    pub fn with_spill_directory(mut self, spill: SpillDirectory) -> Self {
        self.spill = Some(spill);
        self
    }

    pub fn client(&self) -> BufferIngestorClient {
        BufferIngestorClient {
            manager: self.manager.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Processes sealed buffers until cancelled.
    ///
    /// On cancellation the live buffer is sealed, later writes are rejected,
    /// and every pending buffer is processed before returning.
    pub async fn run(mut self, ct: CancellationToken) -> Result<PipelineSummary> {
        let stream = self.manager.stream().clone();
        let mut summary = PipelineSummary::default();

        info!(
            %stream,
            threshold = %ByteSize::b(self.manager.threshold()),
            "Ingestion pipeline started"
        );

        loop {
            tokio::select! {
                _ = ct.cancelled() => {
                    break;
                }
                sealed = self.rx.recv() => {
                    let Some(sealed) = sealed else {
                        break;
                    };

                    self.process(sealed, &mut summary).await;
                }
            }
        }

        // Every buffer sealed before close is already in the channel.
        if let Err(err) = self.manager.close() {
            warn!(%stream, err = %err, "Failed to seal the live buffer on shutdown");
        }

        self.rx.close();
        while let Some(sealed) = self.rx.recv().await {
            self.process(sealed, &mut summary).await;
        }

        info!(
            %stream,
            snapshots = summary.snapshots,
            rows = summary.rows,
            materialization_failures = summary.materialization_failures,
            index_failures = summary.index_failures,
            spilled = summary.spilled.len(),
            "Ingestion pipeline stopped"
        );

        Ok(summary)
    }

    async fn process(&self, sealed: SealedBuffer, summary: &mut PipelineSummary) {
        let attributes = [KeyValue::new("stream", sealed.stream.to_string())];
        let rows = sealed.buffer.row_count() as u64;

        debug!(stream = %sealed.stream, seq = sealed.seq, rows, "Processing sealed buffer");

        let snapshot = match self.materializer.materialize(&sealed).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.metrics.materialization_failures.add(1, &attributes);
                summary.materialization_failures += 1;
                self.spill(&sealed, summary).await;
                error!(stream = %sealed.stream, seq = sealed.seq, rows, err = %err, "Buffer not materialized");
                return;
            }
        };

        self.metrics.snapshots.add(1, &attributes);
        self.metrics
            .snapshot_bytes
            .add(snapshot.size_bytes, &attributes);
        summary.snapshots += 1;
        summary.rows += rows;

        match index_snapshot(&self.index_writer, &snapshot, sealed.buffer.batches()).await {
            Some(indexed) => summary.indexed_rows += indexed,
            None => {
                self.metrics.index_failures.add(1, &attributes);
                summary.index_failures += 1;
            }
        }
    }

    async fn spill(&self, sealed: &SealedBuffer, summary: &mut PipelineSummary) {
        let Some(spill) = &self.spill else {
            warn!(stream = %sealed.stream, seq = sealed.seq, "No spill directory configured. Buffer dropped");
            return;
        };

        match spill.spill(sealed).await {
            Ok(path) => {
                self.metrics
                    .spilled_buffers
                    .add(1, &[KeyValue::new("stream", sealed.stream.to_string())]);
                warn!(path = %path.display(), rows = sealed.buffer.row_count(), "Buffer spilled to local disk");
                summary.spilled.push(path);
            }
            Err(err) => {
                error!(stream = %sealed.stream, seq = sealed.seq, err = %err, "Failed to spill buffer. Buffer dropped");
            }
        }
    }
}

/// Registers the snapshot and writes its index rows. Failures are logged by
/// the index writer and leave the snapshot in storage.
pub(crate) async fn index_snapshot(
    index_writer: &IndexWriter,
    snapshot: &Snapshot,
    batches: &[RecordBatch],
) -> Option<u64> {
    let snapshot_ref = index_writer.register_snapshot(snapshot).await.ok()?;

    index_writer.write_index(batches, &snapshot_ref).await.ok()
}

impl BufferIngestorClient {
    pub fn stream(&self) -> &StreamName {
        self.manager.stream()
    }

    pub fn schema(&self) -> &SchemaRef {
        self.manager.schema()
    }

    /// Appends the batch to the live buffer, handing the buffer off to the
    /// pipeline if it crossed the threshold.
    pub fn extend(&self, batch: RecordBatch) -> Result<Ack> {
        let rows = batch.num_rows();
        let bytes = estimate_batch_size(&batch);

        let cutover = self.manager.extend(batch)?;

        let attributes = [KeyValue::new("stream", self.stream().to_string())];
        self.metrics.ingested_rows.add(rows as u64, &attributes);
        self.metrics.ingested_bytes.add(bytes, &attributes);

        if let Some(seq) = cutover {
            self.record_cutover(seq);
        }

        Ok(Ack { rows, cutover })
    }

    /// Seals the live buffer now if it holds any rows.
    pub fn flush(&self) -> Result<Option<u64>> {
        let cutover = self.manager.flush()?;

        if let Some(seq) = cutover {
            self.record_cutover(seq);
        }

        Ok(cutover)
    }

    pub fn status(&self) -> BufferStatus {
        self.manager.status()
    }

    fn record_cutover(&self, seq: u64) {
        self.metrics
            .cutovers
            .add(1, &[KeyValue::new("stream", self.stream().to_string())]);

        debug!(stream = %self.stream(), seq, "Buffer sealed");
    }
}
