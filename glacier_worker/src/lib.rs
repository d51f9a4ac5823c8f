//! Background maintenance of materialized snapshots.
//!
//! The [`Compactor`] merges the snapshots of a partition into one consolidated
//! snapshot and retires the inputs, the [`CompactionScheduler`] runs it on an
//! interval, and [`reconcile`] reports where object storage and the index
//! store disagree.

pub mod compactor;
mod error;
mod metrics;
pub mod reconcile;
pub mod scheduler;

pub use self::{
    compactor::Compactor,
    error::{Result, WorkerError},
    reconcile::{IndexMismatch, ReconcileReport, list_snapshot_paths, reconcile},
    scheduler::{CompactionRound, CompactionScheduler, run_compaction_scheduler},
};
