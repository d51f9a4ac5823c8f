//! Snapshot and record index.
//!
//! The index has two tables: the snapshot table with one row per snapshot file
//! and the entry table with one [`IndexEntry`] per materialized record. Stores
//! implement [`IndexStore`]; [`InMemoryIndexStore`] is always available and
//! `PostgresIndexStore` is enabled by the `postgres` feature.
//!
//! [`IndexWriter`] wraps a store with the retry policy used by the pipeline.

pub mod entry;
pub mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod store;
pub mod writer;

pub use self::{
    entry::{IndexEntry, project_entries},
    error::{IndexStoreError, IndexWriteError, Result},
    memory::InMemoryIndexStore,
    store::{
        DEFAULT_INDEX_TABLE, DEFAULT_SNAPSHOT_TABLE, IndexStore, IndexTables, RegisteredSnapshot,
    },
    writer::IndexWriter,
};

#[cfg(feature = "postgres")]
pub use self::postgres::PostgresIndexStore;
