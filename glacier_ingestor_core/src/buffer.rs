use arrow::{
    array::{ArrayData, RecordBatch},
    datatypes::SchemaRef,
};

use crate::error::{IngestorError, Result, SchemaMismatchSnafu};

/// Append-only accumulation of record batches sharing one schema.
///
/// The estimated size is the sum of the byte lengths of the Arrow buffers
/// appended so far, kept as a running total.
#[derive(Debug, Clone)]
pub struct Buffer {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    row_count: usize,
    estimated_size: u64,
}

impl Buffer {
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
            row_count: 0,
            estimated_size: 0,
        }
    }

    /// Appends the batch, rejecting it if its fields don't match the buffer schema.
    ///
    /// Field names, types and order must match. Nullability and metadata may
    /// differ: the batch is re-wrapped with the buffer schema.
    pub fn append(&mut self, batch: RecordBatch) -> Result<()> {
        check_schema(&self.schema, &batch)?;

        if batch.num_rows() == 0 {
            return Ok(());
        }

        let batch = RecordBatch::try_new(self.schema.clone(), batch.columns().to_vec())
            .map_err(|err| IngestorError::SchemaMismatch {
                message: err.to_string(),
            })?;

        self.row_count += batch.num_rows();
        self.estimated_size += estimate_batch_size(&batch);
        self.batches.push(batch);

        Ok(())
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn into_batches(self) -> Vec<RecordBatch> {
        self.batches
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn estimated_size(&self) -> u64 {
        self.estimated_size
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }
}

fn check_schema(schema: &SchemaRef, batch: &RecordBatch) -> Result<()> {
    let expected = schema.fields();
    let actual = batch.schema_ref().fields();

    if expected.len() != actual.len() {
        return SchemaMismatchSnafu {
            message: format!(
                "expected {} columns, got {}",
                expected.len(),
                actual.len()
            ),
        }
        .fail();
    }

    for (expected, actual) in expected.iter().zip(actual.iter()) {
        if expected.name() != actual.name() || expected.data_type() != actual.data_type() {
            return SchemaMismatchSnafu {
                message: format!(
                    "expected column {}: {}, got {}: {}",
                    expected.name(),
                    expected.data_type(),
                    actual.name(),
                    actual.data_type()
                ),
            }
            .fail();
        }
    }

    Ok(())
}

/// Sum of the byte lengths of the batch's buffers, including null bitmaps and
/// nested children.
pub fn estimate_batch_size(batch: &RecordBatch) -> u64 {
    batch
        .columns()
        .iter()
        .map(|column| array_data_size(&column.to_data()))
        .sum()
}

fn array_data_size(data: &ArrayData) -> u64 {
    let buffers: usize = data.buffers().iter().map(|buffer| buffer.len()).sum();
    let nulls = data.nulls().map(|nulls| nulls.buffer().len()).unwrap_or(0);
    let children: u64 = data.child_data().iter().map(array_data_size).sum();

    (buffers + nulls) as u64 + children
}
