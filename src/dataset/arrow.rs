// src/dataset/arrow.rs

use arrow::{
    array::{Array, ArrayRef, Float64Array, Int64Array, StringArray},
    compute::cast,
    datatypes::{DataType, Schema},
    record_batch::RecordBatch,
    util::display::{ArrayFormatter, FormatOptions},
};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::reader::ChunkReader;
use tracing::debug;

use super::{Column, ColumnKind, Dataset, Value};
use crate::error::LoadError;

/// Map an Arrow DataType onto the dataset's column kinds.
///
/// - Int8..Int64, UInt8..UInt64  → Integer
/// - Float16/32/64, Decimal*     → Float
/// - Utf8, LargeUtf8, Utf8View   → Text
/// - fallback                    → Text (rendered with arrow's display formatter)
pub fn column_kind(dt: &DataType) -> ColumnKind {
    match dt {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => ColumnKind::Integer,
        DataType::Float16
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => ColumnKind::Float,
        _ => ColumnKind::Text,
    }
}

/// Read every row group of a Parquet source into a [`Dataset`].
///
/// `reader` is anything Parquet can seek in: an open `File` for staged
/// downloads, or the in-memory response body.
pub fn read_parquet<R: ChunkReader + 'static>(reader: R) -> Result<Dataset, LoadError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(reader)?;
    let schema = builder.schema().clone();
    let batch_reader = builder.with_batch_size(8192).build()?;

    let batches = batch_reader.collect::<Result<Vec<_>, _>>()?;
    debug!(batches = batches.len(), "decoded parquet");
    record_batches_to_dataset(&schema, &batches)
}

/// Flatten record batches sharing `schema` into one row-major dataset.
pub fn record_batches_to_dataset(
    schema: &Schema,
    batches: &[RecordBatch],
) -> Result<Dataset, LoadError> {
    let columns: Vec<Column> = schema
        .fields()
        .iter()
        .map(|f| Column::new(f.name().clone(), column_kind(f.data_type())))
        .collect();

    let total: usize = batches.iter().map(RecordBatch::num_rows).sum();
    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(total);

    for batch in batches {
        let start = rows.len();
        rows.extend((0..batch.num_rows()).map(|_| Vec::with_capacity(columns.len())));
        for (col, array) in columns.iter().zip(batch.columns()) {
            let values = column_values(col.kind, array)?;
            for (row, value) in rows[start..].iter_mut().zip(values) {
                row.push(value);
            }
        }
    }

    Dataset::new(columns, rows)
}

fn column_values(kind: ColumnKind, array: &ArrayRef) -> Result<Vec<Value>, LoadError> {
    match kind {
        ColumnKind::Integer => {
            // Unsigned values past i64::MAX cast to null rather than erroring.
            let casted = cast(array, &DataType::Int64)?;
            let ints = casted
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| downcast_error("Int64"))?;
            Ok(ints
                .iter()
                .map(|v| v.map_or(Value::Null, Value::Int))
                .collect())
        }
        ColumnKind::Float => {
            let casted = cast(array, &DataType::Float64)?;
            let floats = casted
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| downcast_error("Float64"))?;
            Ok(floats
                .iter()
                .map(|v| v.map_or(Value::Null, Value::Float))
                .collect())
        }
        ColumnKind::Text if is_string(array.data_type()) => {
            let casted = cast(array, &DataType::Utf8)?;
            let strings = casted
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| downcast_error("Utf8"))?;
            Ok(strings
                .iter()
                .map(|v| v.map_or(Value::Null, |s| Value::Text(s.to_string())))
                .collect())
        }
        ColumnKind::Text => {
            let options = FormatOptions::default();
            let formatter = ArrayFormatter::try_new(array.as_ref(), &options)?;
            Ok((0..array.len())
                .map(|i| {
                    if array.is_null(i) {
                        Value::Null
                    } else {
                        Value::Text(formatter.value(i).to_string())
                    }
                })
                .collect())
        }
    }
}

fn is_string(dt: &DataType) -> bool {
    matches!(dt, DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View)
}

fn downcast_error(target: &str) -> LoadError {
    LoadError::Arrow(arrow::error::ArrowError::CastError(format!(
        "expected {} array after cast",
        target
    )))
}
