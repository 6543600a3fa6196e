//! Conversion between [`Frame`] and Arrow [`RecordBatch`].

use std::sync::Arc;

use ::arrow::array::{Array, ArrayRef, Float64Array, LargeStringArray, StringArray};
use ::arrow::compute::cast;
use ::arrow::datatypes::{DataType, Field, Schema};
use ::arrow::record_batch::RecordBatch;
use cp_core::{Column, Frame};

/// Error type for Arrow conversion.
#[derive(Debug, thiserror::Error)]
pub enum ArrowFrameError {
    /// Underlying Arrow failure.
    #[error("Arrow error: {0}")]
    Arrow(#[from] ::arrow::error::ArrowError),

    /// Column type with no frame equivalent.
    #[error("column '{name}' has unsupported Arrow type {data_type}")]
    UnsupportedType {
        /// Column name.
        name: String,
        /// Arrow type.
        data_type: DataType,
    },

    /// Batches disagree on schema or the frame cannot be assembled.
    #[error("frame error: {0}")]
    Frame(String),
}

impl From<ArrowFrameError> for cp_core::Error {
    fn from(e: ArrowFrameError) -> Self {
        match e {
            ArrowFrameError::UnsupportedType { .. } => cp_core::Error::Unsupported(e.to_string()),
            other => cp_core::Error::Validation(other.to_string()),
        }
    }
}

/// Convert a frame into a single RecordBatch.
pub fn frame_to_batch(frame: &Frame) -> Result<RecordBatch, ArrowFrameError> {
    let mut fields = Vec::with_capacity(frame.n_cols());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(frame.n_cols());
    for (name, col) in frame.iter() {
        match col {
            Column::Float(v) => {
                fields.push(Field::new(name, DataType::Float64, true));
                let arr: Float64Array =
                    v.iter().map(|&x| if x.is_nan() { None } else { Some(x) }).collect();
                arrays.push(Arc::new(arr));
            }
            Column::Str(v) => {
                fields.push(Field::new(name, DataType::Utf8, true));
                let arr: StringArray = v.iter().map(|s| s.as_deref()).collect();
                arrays.push(Arc::new(arr));
            }
        }
    }
    let schema = Arc::new(Schema::new(fields));
    Ok(RecordBatch::try_new(schema, arrays)?)
}

fn numeric_like(dt: &DataType) -> bool {
    dt.is_numeric() || matches!(dt, DataType::Boolean | DataType::Null)
}

fn column_from_array(name: &str, array: &ArrayRef) -> Result<Column, ArrowFrameError> {
    let dt = array.data_type();
    if numeric_like(dt) {
        let casted = cast(array, &DataType::Float64)?;
        let floats = casted
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| ArrowFrameError::Frame(format!("cast of '{}' to Float64 failed", name)))?;
        let values =
            (0..floats.len()).map(|i| if floats.is_null(i) { f64::NAN } else { floats.value(i) });
        return Ok(Column::Float(values.collect()));
    }
    match dt {
        DataType::Utf8 => {
            let s = array.as_any().downcast_ref::<StringArray>().ok_or_else(|| {
                ArrowFrameError::Frame(format!("'{}' is not a StringArray", name))
            })?;
            Ok(Column::Str(s.iter().map(|v| v.map(str::to_string)).collect()))
        }
        DataType::LargeUtf8 => {
            let s = array.as_any().downcast_ref::<LargeStringArray>().ok_or_else(|| {
                ArrowFrameError::Frame(format!("'{}' is not a LargeStringArray", name))
            })?;
            Ok(Column::Str(s.iter().map(|v| v.map(str::to_string)).collect()))
        }
        DataType::Dictionary(_, value) if matches!(value.as_ref(), DataType::Utf8) => {
            let casted = cast(array, &DataType::Utf8)?;
            column_from_array(name, &casted)
        }
        other => Err(ArrowFrameError::UnsupportedType { name: name.to_string(), data_type: other.clone() }),
    }
}

fn append(dst: &mut Column, src: Column) -> Result<(), ArrowFrameError> {
    match (dst, src) {
        (Column::Float(a), Column::Float(b)) => a.extend(b),
        (Column::Str(a), Column::Str(b)) => a.extend(b),
        _ => return Err(ArrowFrameError::Frame("column type differs between batches".into())),
    }
    Ok(())
}

/// Concatenate RecordBatches (same schema) into a frame.
pub fn frame_from_batches(batches: &[RecordBatch]) -> Result<Frame, ArrowFrameError> {
    let Some(first) = batches.first() else {
        return Ok(Frame::new());
    };
    let schema = first.schema();
    let mut columns: Vec<(String, Column)> = Vec::with_capacity(schema.fields().len());
    for (idx, field) in schema.fields().iter().enumerate() {
        columns.push((field.name().clone(), column_from_array(field.name(), first.column(idx))?));
    }
    for batch in &batches[1..] {
        if batch.schema().fields() != schema.fields() {
            return Err(ArrowFrameError::Frame("RecordBatch schemas differ".into()));
        }
        for (idx, (name, col)) in columns.iter_mut().enumerate() {
            append(col, column_from_array(name, batch.column(idx))?)?;
        }
    }
    Frame::from_columns(columns).map_err(|e| ArrowFrameError::Frame(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::arrow::array::{BooleanArray, Int32Array};

    #[test]
    fn frame_batch_round_trip() {
        let f = Frame::from_columns(vec![
            ("block", Column::Float(vec![1.0, 2.0, 3.0])),
            ("neighborhood", Column::Str(vec![Some("Once".into()), None, Some("Belgrano".into())])),
            ("total_thefts", Column::Float(vec![0.0, f64::NAN, 2.0])),
        ])
        .unwrap();
        let batch = frame_to_batch(&f).unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.column(2).null_count(), 1);

        let back = frame_from_batches(&[batch.clone(), batch]).unwrap();
        assert_eq!(back.n_rows(), 6);
        assert_eq!(back.strings("neighborhood").unwrap()[3].as_deref(), Some("Once"));
        assert!(back.floats("total_thefts").unwrap()[4].is_nan());
    }

    #[test]
    fn integer_and_bool_columns_become_floats() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("month", DataType::Int32, true),
            Field::new("post", DataType::Boolean, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![Some(7), None])),
                Arc::new(BooleanArray::from(vec![false, true])),
            ],
        )
        .unwrap();
        let f = frame_from_batches(&[batch]).unwrap();
        assert_eq!(f.floats("month").unwrap()[0], 7.0);
        assert!(f.floats("month").unwrap()[1].is_nan());
        assert_eq!(f.floats("post").unwrap(), &[0.0, 1.0]);
    }
}
