//! The book record ingested by the default stream.
//!
//! Records travel through the pipeline as Arrow batches. [`BookRecord`] is the
//! typed, deserializable form accepted at the edges, converted with
//! [`books_to_record_batch`].

use std::sync::{Arc, LazyLock};

use arrow::array::{ArrayRef, Date32Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};

pub const ISBN_COLUMN: &str = "isbn";
pub const DESCRIPTION_COLUMN: &str = "description";
pub const AUTHOR_COLUMN: &str = "author";
pub const PAGES_COLUMN: &str = "pages";
pub const PUB_DATE_COLUMN: &str = "pub_date";
pub const PID_COLUMN: &str = "pid";
pub const FINGERPRINT_COLUMN: &str = "fingerprint";

/// Days between 0001-01-01 (CE) and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

static BOOK_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new(ISBN_COLUMN, DataType::Utf8, false),
        Field::new(DESCRIPTION_COLUMN, DataType::Utf8, false),
        Field::new(AUTHOR_COLUMN, DataType::Utf8, false),
        Field::new(PAGES_COLUMN, DataType::Int64, false),
        Field::new(PUB_DATE_COLUMN, DataType::Date32, false),
        Field::new(PID_COLUMN, DataType::Int64, false),
        Field::new(FINGERPRINT_COLUMN, DataType::Int64, false),
    ]))
});

/// Returns the schema of book batches.
pub fn book_schema() -> SchemaRef {
    BOOK_SCHEMA.clone()
}

/// A book as received from clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BookRecord {
    /// ISBN-10 or ISBN-13, dashes are stripped on deserialization.
    #[serde(deserialize_with = "deserialize_isbn")]
    pub isbn: String,
    pub description: String,
    pub author: String,
    pub pages: i64,
    pub pub_date: NaiveDate,
}

impl BookRecord {
    /// Stable content fingerprint of the record.
    ///
    /// SHA-256 over the length-prefixed isbn, the big-endian page count and the
    /// length-prefixed author, truncated to the first 8 bytes. Identical on
    /// every process and platform; 64-bit collisions are possible and must not
    /// be relied upon for uniqueness.
    pub fn fingerprint(&self) -> i64 {
        fingerprint(&self.isbn, self.pages, &self.author)
    }
}

/// Computes the fingerprint of the given book fields.
pub fn fingerprint(isbn: &str, pages: i64, author: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update((isbn.len() as u64).to_be_bytes());
    hasher.update(isbn.as_bytes());
    hasher.update(pages.to_be_bytes());
    hasher.update((author.len() as u64).to_be_bytes());
    hasher.update(author.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(prefix)
}

/// Converts the records to a batch with the [`book_schema`], tagging every row
/// with the ingesting process id.
pub fn books_to_record_batch(records: &[BookRecord], pid: i64) -> Result<RecordBatch, ArrowError> {
    let isbn = StringArray::from_iter_values(records.iter().map(|r| r.isbn.as_str()));
    let description =
        StringArray::from_iter_values(records.iter().map(|r| r.description.as_str()));
    let author = StringArray::from_iter_values(records.iter().map(|r| r.author.as_str()));
    let pages = Int64Array::from_iter_values(records.iter().map(|r| r.pages));
    let pub_date = Date32Array::from_iter_values(records.iter().map(|r| date_to_days(r.pub_date)));
    let pid = Int64Array::from_iter_values(records.iter().map(|_| pid));
    let fingerprint = Int64Array::from_iter_values(records.iter().map(BookRecord::fingerprint));

    let columns: Vec<ArrayRef> = vec![
        Arc::new(isbn),
        Arc::new(description),
        Arc::new(author),
        Arc::new(pages),
        Arc::new(pub_date),
        Arc::new(pid),
        Arc::new(fingerprint),
    ];

    RecordBatch::try_new(book_schema(), columns)
}

/// Converts a date to days since the unix epoch, as stored in `Date32` columns.
pub fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

/// Converts days since the unix epoch back to a date.
pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
}

fn deserialize_isbn<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(value.replace('-', ""))
}
