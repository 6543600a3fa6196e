//! # cp-core
//!
//! Core types shared by every crimepanel crate.
//!
//! - [`Error`] / [`Result`]: the library error type.
//! - [`Frame`] / [`Column`]: a small columnar table. Numeric columns store
//!   missing values as `NaN`, string columns as `None`.
//! - [`traits::FrameTransform`]: the seam every preparation step implements.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod traits;

pub use error::{Error, Result};
pub use frame::{Column, Frame};
pub use traits::FrameTransform;

/// Crate version, used in artifact metadata and `crimepanel version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
