//! Ingestion buffer and materialization pipeline.
//!
//! ```text
//!  extend ──> BufferManager ──cutover──> BufferIngestor ──> SnapshotMaterializer ──> object storage
//!                                              │
//!                                              └──> IndexWriter ──> index store
//! ```
//!
//! Each stream has one [`BufferManager`] owning its live [`Buffer`]. Writers
//! go through a [`BufferIngestorClient`]; the background [`BufferIngestor`]
//! turns sealed buffers into snapshots and indexes them. Buffers that can't be
//! uploaded are kept in a [`SpillDirectory`] and uploaded later by
//! [`recover_spilled`].

pub mod buffer;
pub mod error;
pub mod ingestor;
pub mod manager;
pub mod materializer;
pub mod metrics;
pub mod recovery;
pub mod registry;
pub mod sequencer;
pub mod snapshot_file;
pub mod spill;

pub use self::{
    buffer::Buffer,
    error::{IngestorError, Result},
    ingestor::{
        Ack, BufferIngestor, BufferIngestorClient, PipelineSummary, run_background_ingestor,
    },
    manager::{BufferManager, BufferStatus, SealedBuffer},
    materializer::SnapshotMaterializer,
    recovery::{RecoverySummary, recover_spilled},
    registry::{StreamRegistry, StreamRegistryBuilder},
    sequencer::{Clock, FilenameSequencer, ManualClock, SystemClock},
    snapshot_file::SnapshotFile,
    spill::SpillDirectory,
};
