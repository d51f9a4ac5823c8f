//! Ownership of the live buffer of a stream.
//!
//! ```text
//!            extend(batch)
//!                 │
//!   ┌─────────────▼──────────────┐
//!   │ lock                       │
//!   │   live.append(batch)       │
//!   │   size > threshold?  ──no──┼──> None
//!   │     swap in empty buffer   │
//!   │     seq += 1               │
//!   │     send SealedBuffer ─────┼──> pipeline channel
//!   └─────────────┬──────────────┘
//!                 ▼
//!             Some(seq)
//! ```
//!
//! Append, threshold check, swap and hand-off happen in one critical section,
//! so a record never lands in a sealed buffer, no buffer is sealed twice, and
//! sealed buffers reach the pipeline in cutover order. Once [`close`] returns,
//! every buffer sealed before it is already in the channel.
//!
//! The channel is unbounded, so the hand-off never waits. No I/O happens
//! under the lock.
//!
//! [`close`]: BufferManager::close

use std::sync::{Mutex, MutexGuard, PoisonError};

use arrow::{array::RecordBatch, datatypes::SchemaRef};
use glacier_resources::StreamName;
use tokio::sync::mpsc;

use crate::{
    buffer::Buffer,
    error::{PipelineClosedSnafu, Result},
};

/// A buffer detached from the manager. It is never mutated again.
#[derive(Debug, Clone)]
pub struct SealedBuffer {
    pub stream: StreamName,
    /// Cutover sequence number, starting at 1 and strictly increasing per stream.
    pub seq: u64,
    pub buffer: Buffer,
}

/// Snapshot of the live buffer state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferStatus {
    pub stream: StreamName,
    pub estimated_size: u64,
    pub row_count: usize,
    pub threshold: u64,
    /// Number of cutovers so far.
    pub cutovers: u64,
}

#[derive(Debug)]
struct LiveState {
    live: Buffer,
    last_seq: u64,
    closed: bool,
}

#[derive(Debug)]
pub struct BufferManager {
    stream: StreamName,
    schema: SchemaRef,
    threshold: u64,
    sealed_tx: mpsc::UnboundedSender<SealedBuffer>,
    state: Mutex<LiveState>,
}

impl BufferManager {
    /// Creates a manager that cuts over once the estimated size exceeds
    /// `threshold` bytes and sends every sealed buffer to `sealed_tx`.
    pub fn new(
        stream: StreamName,
        schema: SchemaRef,
        threshold: u64,
        sealed_tx: mpsc::UnboundedSender<SealedBuffer>,
    ) -> Self {
        Self {
            stream,
            sealed_tx,
            state: Mutex::new(LiveState {
                live: Buffer::new(schema.clone()),
                last_seq: 0,
                closed: false,
            }),
            schema,
            threshold,
        }
    }

    pub fn stream(&self) -> &StreamName {
        &self.stream
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Appends the batch to the live buffer.
    ///
    /// Returns the sequence number of the sealed buffer if the append pushed
    /// the estimated size over the threshold.
    pub fn extend(&self, batch: RecordBatch) -> Result<Option<u64>> {
        let mut state = self.lock();

        if state.closed || self.sealed_tx.is_closed() {
            return PipelineClosedSnafu {
                stream: self.stream.clone(),
            }
            .fail();
        }

        state.live.append(batch)?;

        if state.live.estimated_size() > self.threshold {
            return self.cutover(&mut state).map(Some);
        }

        Ok(None)
    }

    /// Seals the live buffer if it holds any rows.
    pub fn flush(&self) -> Result<Option<u64>> {
        let mut state = self.lock();

        if state.live.is_empty() {
            return Ok(None);
        }

        self.cutover(&mut state).map(Some)
    }

    /// Seals the live buffer and rejects every later [`extend`](Self::extend).
    pub fn close(&self) -> Result<Option<u64>> {
        let mut state = self.lock();
        state.closed = true;

        if state.live.is_empty() {
            return Ok(None);
        }

        self.cutover(&mut state).map(Some)
    }

    pub fn status(&self) -> BufferStatus {
        let state = self.lock();

        BufferStatus {
            stream: self.stream.clone(),
            estimated_size: state.live.estimated_size(),
            row_count: state.live.row_count(),
            threshold: self.threshold,
            cutovers: state.last_seq,
        }
    }

    fn cutover(&self, state: &mut LiveState) -> Result<u64> {
        let buffer = std::mem::replace(&mut state.live, Buffer::new(self.schema.clone()));
        state.last_seq += 1;
        let seq = state.last_seq;

        let sealed = SealedBuffer {
            stream: self.stream.clone(),
            seq,
            buffer,
        };

        if self.sealed_tx.send(sealed).is_err() {
            state.closed = true;
            return PipelineClosedSnafu {
                stream: self.stream.clone(),
            }
            .fail();
        }

        Ok(seq)
    }

    // The state stays consistent even if a holder panicked: every mutation
    // is a single append or swap.
    fn lock(&self) -> MutexGuard<'_, LiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, thread};

    use arrow::{
        array::{ArrayRef, AsArray, Int64Array},
        datatypes::{DataType, Field, Int64Type, Schema},
    };

    use super::*;
    use crate::error::IngestorError;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]))
    }

    /// One row, 8 bytes.
    fn row(id: i64) -> RecordBatch {
        let columns: Vec<ArrayRef> = vec![Arc::new(Int64Array::from(vec![id]))];
        RecordBatch::try_new(schema(), columns).unwrap()
    }

    fn ids(sealed: &SealedBuffer) -> Vec<i64> {
        sealed
            .buffer
            .batches()
            .iter()
            .flat_map(|b| b.column(0).as_primitive::<Int64Type>().values().to_vec())
            .collect()
    }

    fn manager(threshold: u64) -> (BufferManager, mpsc::UnboundedReceiver<SealedBuffer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = BufferManager::new(StreamName::new_unchecked("test"), schema(), threshold, tx);
        (manager, rx)
    }

    #[test]
    fn test_cutover_only_when_strictly_above_threshold() {
        let (manager, mut rx) = manager(16);

        assert!(manager.extend(row(1)).unwrap().is_none());
        // 16 bytes is not above the threshold.
        assert!(manager.extend(row(2)).unwrap().is_none());
        assert!(rx.try_recv().is_err());

        assert_eq!(manager.extend(row(3)).unwrap(), Some(1));
        let sealed = rx.try_recv().expect("sealed buffer");
        assert_eq!(sealed.seq, 1);
        assert_eq!(ids(&sealed), vec![1, 2, 3]);

        let status = manager.status();
        assert_eq!(status.row_count, 0);
        assert_eq!(status.estimated_size, 0);
        assert_eq!(status.cutovers, 1);
    }

    #[test]
    fn test_flush() {
        let (manager, mut rx) = manager(1024);
        assert_eq!(manager.flush().unwrap(), None);

        manager.extend(row(1)).unwrap();
        assert_eq!(manager.flush().unwrap(), Some(1));
        let sealed = rx.try_recv().expect("flushed buffer");
        assert_eq!(ids(&sealed), vec![1]);

        assert_eq!(manager.flush().unwrap(), None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_seals_and_rejects_later_writes() {
        let (manager, mut rx) = manager(1024);
        manager.extend(row(1)).unwrap();

        assert_eq!(manager.close().unwrap(), Some(1));
        assert_eq!(ids(&rx.try_recv().expect("sealed buffer")), vec![1]);

        let err = manager.extend(row(2)).unwrap_err();
        assert!(matches!(err, IngestorError::PipelineClosed { .. }));
        assert_eq!(manager.close().unwrap(), None);
        assert_eq!(manager.flush().unwrap(), None);
    }

    #[test]
    fn test_dropped_receiver_rejects_writes_before_appending() {
        let (manager, rx) = manager(1024);
        drop(rx);

        let err = manager.extend(row(1)).unwrap_err();
        assert!(matches!(err, IngestorError::PipelineClosed { .. }));
        assert_eq!(manager.status().row_count, 0);
    }

    #[test]
    fn test_rejected_batch_leaves_buffer_untouched() {
        let (manager, _rx) = manager(1024);
        manager.extend(row(1)).unwrap();

        let other = Arc::new(Schema::new(vec![Field::new("other", DataType::Int64, false)]));
        let columns: Vec<ArrayRef> = vec![Arc::new(Int64Array::from(vec![2]))];
        let batch = RecordBatch::try_new(other, columns).unwrap();

        assert!(manager.extend(batch).is_err());
        assert_eq!(manager.status().row_count, 1);
    }

    #[test]
    fn test_concurrent_extend_loses_and_duplicates_nothing() {
        let (manager, mut rx) = manager(100);
        let manager = Arc::new(manager);
        let threads = 8;
        let per_thread = 500;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let manager = manager.clone();
                thread::spawn(move || {
                    for i in 0..per_thread {
                        manager.extend(row(t * per_thread + i)).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        manager.close().unwrap();

        let mut sealed = Vec::new();
        while let Ok(buffer) = rx.try_recv() {
            sealed.push(buffer);
        }

        // Buffers arrive in cutover order.
        let seqs: Vec<u64> = sealed.iter().map(|s| s.seq).collect();
        let expected: Vec<u64> = (1..=sealed.len() as u64).collect();
        assert_eq!(seqs, expected);

        let all: Vec<i64> = sealed.iter().flat_map(ids).collect();
        let unique: HashSet<i64> = all.iter().copied().collect();
        assert_eq!(all.len(), (threads * per_thread) as usize);
        assert_eq!(unique.len(), all.len());
    }
}
