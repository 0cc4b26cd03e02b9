//! Arrow IPC interop.
//!
//! Remote column buffers arrive as Arrow IPC streams. Decoding maps each Arrow field to a
//! [`Column`] under the field name; frames produced here carry an identity row index.
//!
//! Binned columns (`UInt8`/`UInt16` buckets with `bin_min`, `bin_max` and `bin_count` field
//! metadata) are de-digitized to bucket mid-points.

use crate::column::Column;
use crate::error::{FrameError, Result};
use crate::frame::Dataframe;
use crate::index::RowIndex;
use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Float64Type, Int32Type, UInt16Type, UInt8Type};
use arrow_array::{
    Array, ArrayRef, BooleanArray, Float32Array, Int32Array, RecordBatch, StringArray,
};
use arrow_ipc::reader::StreamReader;
use arrow_ipc::writer::StreamWriter;
use arrow_schema::{ArrowError, DataType, Field, Schema};
use bytes::Bytes;
use std::io::Cursor;
use std::sync::Arc;

pub const BIN_MIN_KEY: &str = "bin_min";
pub const BIN_MAX_KEY: &str = "bin_max";
pub const BIN_COUNT_KEY: &str = "bin_count";

impl From<ArrowError> for FrameError {
    fn from(err: ArrowError) -> Self {
        FrameError::Arrow(err.to_string())
    }
}

/// Decode an Arrow IPC stream into a single frame, concatenating all batches.
pub fn read_ipc_stream(buf: &[u8]) -> Result<Dataframe> {
    let reader = StreamReader::try_new(Cursor::new(buf), None)?;
    let schema = reader.schema();
    let mut columns: Vec<Option<Column>> = vec![None; schema.fields().len()];
    let mut rows = 0usize;

    for batch in reader {
        let batch = batch?;
        rows += batch.num_rows();
        for (slot, (field, array)) in columns
            .iter_mut()
            .zip(schema.fields().iter().zip(batch.columns()))
        {
            let decoded = array_to_column(field, array.as_ref())?;
            *slot = Some(match slot.take() {
                Some(prev) => concat(field.name(), prev, decoded)?,
                None => decoded,
            });
        }
    }

    let columns = schema
        .fields()
        .iter()
        .zip(columns)
        .map(|(field, column)| {
            let column = column.unwrap_or_else(|| empty_like(field.data_type()));
            (field.name().clone(), column)
        });
    Dataframe::from_columns(RowIndex::identity(rows), columns)
}

pub fn record_batch_to_dataframe(batch: &RecordBatch) -> Result<Dataframe> {
    let schema = batch.schema();
    let columns = schema
        .fields()
        .iter()
        .zip(batch.columns())
        .map(|(field, array)| Ok((field.name().clone(), array_to_column(field, array.as_ref())?)))
        .collect::<Result<Vec<_>>>()?;
    Dataframe::from_columns(RowIndex::identity(batch.num_rows()), columns)
}

pub fn dataframe_to_record_batch(frame: &Dataframe) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(frame.column_count());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(frame.column_count());
    for (label, column) in frame.columns() {
        let (data_type, array): (DataType, ArrayRef) = match column {
            Column::Float32(v) => (
                DataType::Float32,
                Arc::new(Float32Array::from(v.to_vec())),
            ),
            Column::Int32(v) => (DataType::Int32, Arc::new(Int32Array::from(v.to_vec()))),
            Column::Boolean(v) => (
                DataType::Boolean,
                Arc::new(BooleanArray::from(v.to_vec())),
            ),
            Column::String(v) => (
                DataType::Utf8,
                Arc::new(StringArray::from_iter_values(v.iter().map(|s| s.as_ref()))),
            ),
        };
        fields.push(Field::new(label, data_type, false));
        arrays.push(array);
    }
    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
    Ok(batch)
}

/// Encode a frame as a single-batch Arrow IPC stream.
pub fn write_ipc_stream(frame: &Dataframe) -> Result<Bytes> {
    let batch = dataframe_to_record_batch(frame)?;
    write_record_batch(&batch)
}

pub fn write_record_batch(batch: &RecordBatch) -> Result<Bytes> {
    let mut writer = StreamWriter::try_new(Vec::new(), batch.schema().as_ref())?;
    writer.write(batch)?;
    writer.finish()?;
    Ok(Bytes::from(writer.into_inner()?))
}

fn array_to_column(field: &Field, array: &dyn Array) -> Result<Column> {
    let name = field.name();
    let column = match array.data_type() {
        DataType::Float32 => {
            let values = array.as_primitive::<Float32Type>();
            Column::Float32(
                (0..values.len())
                    .map(|i| if values.is_null(i) { f32::NAN } else { values.value(i) })
                    .collect(),
            )
        }
        DataType::Float64 => {
            let values = array.as_primitive::<Float64Type>();
            Column::Float32(
                (0..values.len())
                    .map(|i| {
                        if values.is_null(i) {
                            f32::NAN
                        } else {
                            values.value(i) as f32
                        }
                    })
                    .collect(),
            )
        }
        DataType::Int32 => {
            let values = array.as_primitive::<Int32Type>();
            Column::Int32((0..values.len()).map(|i| values.value(i)).collect())
        }
        DataType::Boolean => {
            let values = array.as_boolean();
            Column::Boolean((0..values.len()).map(|i| !values.is_null(i) && values.value(i)).collect())
        }
        DataType::Utf8 => {
            let values = array.as_string::<i32>();
            Column::String(
                (0..values.len())
                    .map(|i| Arc::<str>::from(if values.is_null(i) { "" } else { values.value(i) }))
                    .collect(),
            )
        }
        DataType::LargeUtf8 => {
            let values = array.as_string::<i64>();
            Column::String(
                (0..values.len())
                    .map(|i| Arc::<str>::from(if values.is_null(i) { "" } else { values.value(i) }))
                    .collect(),
            )
        }
        DataType::UInt8 | DataType::UInt16 => {
            let buckets: Vec<u32> = match array.data_type() {
                DataType::UInt8 => {
                    let values = array.as_primitive::<UInt8Type>();
                    (0..values.len()).map(|i| values.value(i) as u32).collect()
                }
                _ => {
                    let values = array.as_primitive::<UInt16Type>();
                    (0..values.len()).map(|i| values.value(i) as u32).collect()
                }
            };
            match bin_range(field) {
                Some((min, max, count)) => {
                    let width = (max - min) / count as f64;
                    Column::Float32(
                        buckets
                            .iter()
                            .map(|&b| (min + (b as f64 + 0.5) * width) as f32)
                            .collect(),
                    )
                }
                None => Column::Int32(buckets.iter().map(|&b| b as i32).collect()),
            }
        }
        DataType::Dictionary(_, value_type)
            if matches!(value_type.as_ref(), DataType::Utf8 | DataType::LargeUtf8) =>
        {
            let dict = array.as_any_dictionary();
            let values = array_to_column(
                &Field::new(name, value_type.as_ref().clone(), true),
                dict.values().as_ref(),
            )?;
            let Column::String(values) = values else {
                unreachable!("utf8 dictionary values decode to strings");
            };
            let keys = dict.normalized_keys();
            Column::String(
                keys.iter()
                    .enumerate()
                    .map(|(i, &k)| {
                        if array.is_null(i) {
                            Arc::<str>::from("")
                        } else {
                            values.get(k).cloned().unwrap_or_else(|| Arc::<str>::from(""))
                        }
                    })
                    .collect(),
            )
        }
        other => {
            return Err(FrameError::UnsupportedArrowType {
                column: name.clone(),
                data_type: other.to_string(),
            })
        }
    };
    Ok(column)
}

fn bin_range(field: &Field) -> Option<(f64, f64, u32)> {
    let metadata = field.metadata();
    let min = metadata.get(BIN_MIN_KEY)?.parse::<f64>().ok()?;
    let max = metadata.get(BIN_MAX_KEY)?.parse::<f64>().ok()?;
    let count = metadata.get(BIN_COUNT_KEY)?.parse::<u32>().ok()?;
    (count > 0 && max >= min).then_some((min, max, count))
}

fn empty_like(data_type: &DataType) -> Column {
    match data_type {
        DataType::Int32 => Column::Int32(Arc::from(Vec::new())),
        DataType::Boolean => Column::Boolean(Arc::from(Vec::new())),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Dictionary(_, _) => {
            Column::String(Arc::from(Vec::new()))
        }
        _ => Column::Float32(Arc::from(Vec::new())),
    }
}

fn concat(label: &str, a: Column, b: Column) -> Result<Column> {
    Ok(match (a, b) {
        (Column::Float32(a), Column::Float32(b)) => Column::Float32(a.iter().chain(b.iter()).copied().collect()),
        (Column::Int32(a), Column::Int32(b)) => Column::Int32(a.iter().chain(b.iter()).copied().collect()),
        (Column::Boolean(a), Column::Boolean(b)) => Column::Boolean(a.iter().chain(b.iter()).copied().collect()),
        (Column::String(a), Column::String(b)) => Column::String(a.iter().chain(b.iter()).cloned().collect()),
        (a, b) => {
            return Err(FrameError::TypeMismatch {
                column: label.to_owned(),
                expected: a.column_type(),
                actual: b.column_type(),
            })
        }
    })
}
