//! Fixed mapping from stream names to their ingestion clients.
//!
//! The registry is built once at startup; the set of streams does not change
//! afterwards.

use std::collections::BTreeMap;

use arrow::array::RecordBatch;
use glacier_resources::StreamName;

use crate::{
    error::{DuplicateStreamSnafu, Result, UnknownStreamSnafu},
    ingestor::{Ack, BufferIngestorClient},
    manager::BufferStatus,
};

#[derive(Clone, Default)]
pub struct StreamRegistry {
    streams: BTreeMap<StreamName, BufferIngestorClient>,
}

#[derive(Default)]
pub struct StreamRegistryBuilder {
    streams: BTreeMap<StreamName, BufferIngestorClient>,
}

impl StreamRegistryBuilder {
    pub fn register(mut self, client: BufferIngestorClient) -> Result<Self> {
        let stream = client.stream().clone();

        if self.streams.contains_key(&stream) {
            return DuplicateStreamSnafu { stream }.fail();
        }

        self.streams.insert(stream, client);
        Ok(self)
    }

    pub fn build(self) -> StreamRegistry {
        StreamRegistry {
            streams: self.streams,
        }
    }
}

impl StreamRegistry {
    pub fn builder() -> StreamRegistryBuilder {
        StreamRegistryBuilder::default()
    }

    pub fn get(&self, stream: &str) -> Result<&BufferIngestorClient> {
        StreamName::new(stream)
            .ok()
            .and_then(|name| self.streams.get(&name))
            .ok_or_else(|| {
                UnknownStreamSnafu {
                    stream: stream.to_string(),
                }
                .build()
            })
    }

    pub fn streams(&self) -> impl Iterator<Item = &StreamName> {
        self.streams.keys()
    }

    pub fn extend(&self, stream: &str, batch: RecordBatch) -> Result<Ack> {
        self.get(stream)?.extend(batch)
    }

    /// Seals the live buffer of every stream. Returns the sealed sequence
    /// numbers of the streams that had rows.
    pub fn flush_all(&self) -> Result<Vec<(StreamName, u64)>> {
        let mut flushed = Vec::new();

        for (stream, client) in &self.streams {
            if let Some(seq) = client.flush()? {
                flushed.push((stream.clone(), seq));
            }
        }

        Ok(flushed)
    }

    /// Live buffer status of every stream, sorted by stream name.
    pub fn status(&self) -> Vec<BufferStatus> {
        self.streams.values().map(|client| client.status()).collect()
    }
}
