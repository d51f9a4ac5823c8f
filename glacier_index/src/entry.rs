//! Projection of book batches into index rows.

use arrow::array::{Array, AsArray, RecordBatch};
use arrow::datatypes::{DataType, Date32Type, Int64Type};
use chrono::NaiveDate;
use glacier_resources::SnapshotId;
use glacier_resources::book::{
    AUTHOR_COLUMN, FINGERPRINT_COLUMN, ISBN_COLUMN, PAGES_COLUMN, PID_COLUMN, PUB_DATE_COLUMN,
    days_to_date,
};

use crate::error::{IndexWriteError, ProjectionSnafu};

/// One row of the record index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub isbn: String,
    pub pages: i64,
    pub author: String,
    pub pub_date: NaiveDate,
    pub pid: i64,
    pub fingerprint: i64,
    /// The snapshot holding the full record.
    pub snapshot_id: SnapshotId,
}

/// Projects every row of the batch into an [`IndexEntry`] pointing at `snapshot_id`.
///
/// Columns are looked up by name, so the batch may carry additional columns in
/// any order.
pub fn project_entries(
    batch: &RecordBatch,
    snapshot_id: SnapshotId,
) -> Result<Vec<IndexEntry>, IndexWriteError> {
    let isbn = column(batch, ISBN_COLUMN, &DataType::Utf8)?.as_string::<i32>();
    let author = column(batch, AUTHOR_COLUMN, &DataType::Utf8)?.as_string::<i32>();
    let pages = column(batch, PAGES_COLUMN, &DataType::Int64)?.as_primitive::<Int64Type>();
    let pub_date =
        column(batch, PUB_DATE_COLUMN, &DataType::Date32)?.as_primitive::<Date32Type>();
    let pid = column(batch, PID_COLUMN, &DataType::Int64)?.as_primitive::<Int64Type>();
    let fingerprint =
        column(batch, FINGERPRINT_COLUMN, &DataType::Int64)?.as_primitive::<Int64Type>();

    let mut entries = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let days = pub_date.value(row);
        let Some(pub_date) = days_to_date(days) else {
            return ProjectionSnafu {
                message: format!("row {row}: {days} is not a valid date"),
            }
            .fail();
        };

        entries.push(IndexEntry {
            isbn: isbn.value(row).to_string(),
            pages: pages.value(row),
            author: author.value(row).to_string(),
            pub_date,
            pid: pid.value(row),
            fingerprint: fingerprint.value(row),
            snapshot_id,
        });
    }

    Ok(entries)
}

fn column<'a>(
    batch: &'a RecordBatch,
    name: &str,
    data_type: &DataType,
) -> Result<&'a dyn Array, IndexWriteError> {
    let Some(array) = batch.column_by_name(name) else {
        return ProjectionSnafu {
            message: format!("missing column {name}"),
        }
        .fail();
    };

    if array.data_type() != data_type {
        return ProjectionSnafu {
            message: format!(
                "column {name} has type {}, expected {data_type}",
                array.data_type()
            ),
        }
        .fail();
    }

    if array.null_count() > 0 {
        return ProjectionSnafu {
            message: format!("column {name} contains nulls"),
        }
        .fail();
    }

    Ok(array.as_ref())
}
