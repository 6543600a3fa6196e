//! # cp-translate
//!
//! Moves [`Frame`]s in and out of files.
//!
//! - [`dta`]: native Stata `.dta` reader (formats 113–115 and 117–119),
//!   no Stata or Python required.
//! - [`csv`]: CSV reader/writer with numeric column detection.
//! - [`arrow`]: Frame ↔ Arrow `RecordBatch` bridge and Parquet artifacts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arrow;
pub mod csv;
pub mod dta;

use std::path::Path;

use cp_core::{Error, Frame, Result};

/// On-disk frame format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Stata binary data file.
    Dta,
    /// Comma-separated values with a header row.
    Csv,
    /// Apache Parquet.
    Parquet,
}

impl FrameFormat {
    /// Infer the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
        Self::from_name(&ext)
            .map_err(|_| Error::Unsupported(format!("cannot infer frame format of '{}'", path.display())))
    }

    /// Parse a format name (`dta`, `csv`, `parquet`/`pq`).
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "dta" => Ok(Self::Dta),
            "csv" => Ok(Self::Csv),
            "parquet" | "pq" => Ok(Self::Parquet),
            other => Err(Error::Unsupported(format!("unknown frame format '{}'", other))),
        }
    }
}

/// Read a frame, dispatching on `format` (or the extension when `None`).
pub fn read_frame(path: &Path, format: Option<FrameFormat>) -> Result<Frame> {
    let format = match format {
        Some(f) => f,
        None => FrameFormat::from_path(path)?,
    };
    log::debug!("reading {:?} frame from {}", format, path.display());
    match format {
        FrameFormat::Dta => Ok(dta::read_dta(path)?),
        FrameFormat::Csv => csv::read_csv(path),
        FrameFormat::Parquet => Ok(arrow::parquet::read_frame_parquet(path)?),
    }
}

/// Write a frame. `.dta` output is not supported.
pub fn write_frame(path: &Path, frame: &Frame, format: Option<FrameFormat>) -> Result<()> {
    let format = match format {
        Some(f) => f,
        None => FrameFormat::from_path(path)?,
    };
    match format {
        FrameFormat::Dta => Err(Error::Unsupported("writing .dta files".into())),
        FrameFormat::Csv => csv::write_csv(path, frame),
        FrameFormat::Parquet => Ok(arrow::parquet::write_frame_parquet(path, frame)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cp_core::Column;

    #[test]
    fn format_inference() {
        assert_eq!(FrameFormat::from_path(Path::new("a/b.DTA")).unwrap(), FrameFormat::Dta);
        assert_eq!(FrameFormat::from_path(Path::new("x.parquet")).unwrap(), FrameFormat::Parquet);
        assert!(matches!(FrameFormat::from_path(Path::new("x.sav")), Err(Error::Unsupported(_))));
    }

    #[test]
    fn parquet_and_csv_dispatch_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::from_columns(vec![
            ("block", Column::Float(vec![1.0, 2.0])),
            ("total_thefts", Column::Float(vec![0.0, f64::NAN])),
        ])
        .unwrap();
        for name in ["panel.parquet", "panel.csv"] {
            let path = dir.path().join(name);
            write_frame(&path, &frame, None).unwrap();
            let back = read_frame(&path, None).unwrap();
            assert_eq!(back.floats("block").unwrap(), &[1.0, 2.0]);
            assert!(back.floats("total_thefts").unwrap()[1].is_nan());
        }
        assert!(write_frame(&dir.path().join("x.dta"), &frame, None).is_err());
    }
}
