//! Apache Arrow / Parquet bridge for crimepanel frames.
//!
//! Intermediate pipeline artifacts (normalized raw data, reshaped panels,
//! generated designs) are stored as Parquet so they can be inspected with
//! pandas, Polars or DuckDB.
//!
//! | Frame column | Arrow type |
//! |---|---|
//! | `Column::Float` | `Float64` (NaN written as null) |
//! | `Column::Str` | `Utf8` |
//!
//! On read, any integer, float or boolean Arrow column is cast to `Float64`
//! and nulls become `NaN`.
//!
//! # Modules
//!
//! - [`convert`]: Frame ↔ RecordBatch
//! - [`parquet`]: Read/write Parquet files

pub mod convert;
pub mod parquet;

pub use convert::{ArrowFrameError, frame_from_batches, frame_to_batch};
