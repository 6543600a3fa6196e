//! Parquet file read/write for frame artifacts.

use std::fs::File;
use std::path::Path;

use ::arrow::record_batch::RecordBatch;
use ::parquet::arrow::ArrowWriter;
use ::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use ::parquet::basic::Compression;
use ::parquet::file::properties::WriterProperties;
use cp_core::Frame;

use super::convert::{ArrowFrameError, frame_from_batches, frame_to_batch};

/// Error type for Parquet operations.
#[derive(Debug, thiserror::Error)]
pub enum ParquetError {
    /// Parquet read/write error.
    #[error("Parquet read/write error: {0}")]
    Parquet(#[from] ::parquet::errors::ParquetError),

    /// Arrow error.
    #[error("Arrow error: {0}")]
    Arrow(#[from] ::arrow::error::ArrowError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame conversion error.
    #[error("Conversion error: {0}")]
    Convert(#[from] ArrowFrameError),
}

impl From<ParquetError> for cp_core::Error {
    fn from(e: ParquetError) -> Self {
        match e {
            ParquetError::Io(io) => cp_core::Error::Io(io),
            ParquetError::Convert(c) => c.into(),
            other => cp_core::Error::Validation(other.to_string()),
        }
    }
}

/// Read a Parquet file into Arrow RecordBatches.
pub fn read_parquet_batches(path: &Path) -> Result<Vec<RecordBatch>, ParquetError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let reader = builder.build()?;
    let batches: Result<Vec<_>, _> = reader.collect();
    Ok(batches?)
}

/// Write Arrow RecordBatches to a Parquet file (Snappy compressed).
pub fn write_parquet(path: &Path, batches: &[RecordBatch]) -> Result<(), ParquetError> {
    let Some(first) = batches.first() else {
        return Ok(());
    };
    let props = WriterProperties::builder().set_compression(Compression::SNAPPY).build();
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, first.schema(), Some(props))?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.close()?;
    Ok(())
}

/// Read a Parquet file as a frame.
pub fn read_frame_parquet(path: &Path) -> Result<Frame, ParquetError> {
    let batches = read_parquet_batches(path)?;
    Ok(frame_from_batches(&batches)?)
}

/// Write a frame to a Parquet file.
pub fn write_frame_parquet(path: &Path, frame: &Frame) -> Result<(), ParquetError> {
    let batch = frame_to_batch(frame)?;
    write_parquet(path, &[batch])
}

#[cfg(test)]
mod tests {
    use super::*;
    use cp_core::Column;

    #[test]
    fn parquet_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.parquet");
        let f = Frame::from_columns(vec![
            ("block", Column::Float(vec![1.0, 1.0, 2.0])),
            ("month", Column::Float(vec![7.0, 72.0, 7.0])),
            ("street", Column::Str(vec![Some("Pasteur".into()), Some("Pasteur".into()), None])),
        ])
        .unwrap();
        write_frame_parquet(&path, &f).unwrap();
        let back = read_frame_parquet(&path).unwrap();
        assert_eq!(back, f);
    }
}
