//! Encoding of snapshots as Parquet files.
//!
//! A snapshot file carries the Arrow schema and a few key/value entries in the
//! Parquet footer. The encoding is deterministic: the same batches and
//! metadata always produce the same bytes.

use std::collections::BTreeMap;

use arrow::{array::RecordBatch, datatypes::SchemaRef};
use bytes::Bytes;
use parquet::{
    arrow::{ArrowWriter, arrow_reader::ParquetRecordBatchReaderBuilder},
    basic::Compression,
    file::{metadata::KeyValue, properties::WriterProperties},
};
use snafu::ResultExt;

use crate::error::{ArrowSnafu, ParquetSnafu, Result};

/// Stream that produced the snapshot.
pub const STREAM_METADATA_KEY: &str = "glacier.stream";
/// Cutover sequence number of the buffer the snapshot was made from.
pub const CUTOVER_SEQ_METADATA_KEY: &str = "glacier.cutover_seq";
/// Comma separated names of the snapshots merged into a consolidated snapshot.
pub const SOURCES_METADATA_KEY: &str = "glacier.sources";

/// Metadata written by the Arrow writer itself.
const ARROW_METADATA_PREFIX: &str = "ARROW:";

#[derive(Debug, Clone)]
pub struct SnapshotFile {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
    pub metadata: BTreeMap<String, String>,
}

impl SnapshotFile {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self {
            schema,
            batches,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn row_count(&self) -> u64 {
        self.batches.iter().map(|b| b.num_rows() as u64).sum()
    }

    /// Names of the source snapshots, empty unless this is a consolidated snapshot.
    pub fn sources(&self) -> Vec<String> {
        self.metadata(SOURCES_METADATA_KEY)
            .map(|sources| {
                sources
                    .split(',')
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn encode(&self) -> Result<Bytes> {
        let key_value_metadata = self
            .metadata
            .iter()
            .map(|(key, value)| KeyValue::new(key.clone(), value.clone()))
            .collect();

        let properties = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_key_value_metadata(Some(key_value_metadata))
            .build();

        let mut writer = ArrowWriter::try_new(Vec::new(), self.schema.clone(), Some(properties))
            .context(ParquetSnafu {
                message: "failed to create parquet writer",
            })?;

        for batch in &self.batches {
            writer.write(batch).context(ParquetSnafu {
                message: "failed to write batch",
            })?;
        }

        writer.finish().context(ParquetSnafu {
            message: "failed to finish parquet file",
        })?;

        let data = std::mem::take(writer.inner_mut());
        Ok(Bytes::from(data))
    }

    pub fn decode(data: Bytes) -> Result<Self> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(data).context(ParquetSnafu {
            message: "failed to read parquet footer",
        })?;

        let metadata = builder
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|kv| !kv.key.starts_with(ARROW_METADATA_PREFIX))
                    .filter_map(|kv| Some((kv.key.clone(), kv.value.clone()?)))
                    .collect()
            })
            .unwrap_or_default();

        let schema = builder.schema().clone();
        let reader = builder.build().context(ParquetSnafu {
            message: "failed to create parquet reader",
        })?;

        let batches = reader
            .collect::<std::result::Result<Vec<_>, _>>()
            .context(ArrowSnafu {
                message: "failed to decode parquet file",
            })?;

        Ok(Self {
            schema,
            batches,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use glacier_resources::{BookRecord, book_schema, books_to_record_batch};

    use super::*;

    fn books_file() -> SnapshotFile {
        let books: Vec<_> = (0..3)
            .map(|i| BookRecord {
                isbn: format!("978030640615{i}"),
                description: format!("book number {i}"),
                author: "Grace Hopper".to_string(),
                pages: 100 + i,
                pub_date: NaiveDate::from_ymd_opt(1952, 5, 1).unwrap(),
            })
            .collect();
        let batch = books_to_record_batch(&books, 99).unwrap();

        SnapshotFile::new(book_schema(), vec![batch])
            .with_metadata(STREAM_METADATA_KEY, "books")
            .with_metadata(CUTOVER_SEQ_METADATA_KEY, "4")
    }

    #[test]
    fn test_decode_restores_rows_and_metadata() {
        let file = books_file();
        let decoded = SnapshotFile::decode(file.encode().unwrap()).unwrap();

        assert_eq!(decoded.row_count(), 3);
        assert_eq!(decoded.schema.fields(), book_schema().fields());
        assert_eq!(decoded.batches[0].columns(), file.batches[0].columns());
        assert_eq!(decoded.metadata(STREAM_METADATA_KEY), Some("books"));
        assert_eq!(decoded.metadata(CUTOVER_SEQ_METADATA_KEY), Some("4"));
        assert!(decoded.sources().is_empty());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let file = books_file();
        assert_eq!(file.encode().unwrap(), file.encode().unwrap());
    }

    #[test]
    fn test_sources() {
        let file = SnapshotFile::new(book_schema(), vec![]).with_metadata(
            SOURCES_METADATA_KEY,
            "a_20240101_001.parquet,a_20240101_002.parquet",
        );

        let decoded = SnapshotFile::decode(file.encode().unwrap()).unwrap();
        assert_eq!(decoded.row_count(), 0);
        assert_eq!(
            decoded.sources(),
            vec!["a_20240101_001.parquet", "a_20240101_002.parquet"]
        );
    }
}
