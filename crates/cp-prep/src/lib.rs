//! # cp-prep
//!
//! Turns raw survey/administrative frames into regression-ready panels.
//!
//! - [`normalize`]: ordered substring substitutions from raw column codes
//!   to semantic names.
//! - [`generate`]: dummies, threshold replacement, interactions, period
//!   rescaling, selective nulling, grouped sums.
//! - [`reshape`]: wide theft sub-records → long block × period panel.
//!
//! Every routine is a pure function of its inputs: no row filtering, no
//! global state, a new [`cp_core::Frame`] out.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod generate;
pub mod normalize;
pub mod reshape;

pub use generate::{
    Comparison, FixedRangeDummies, GenerateStep, GroupedSum, PiecewiseRescale, Product,
    RescaleBand, ScaledCopies, SelectiveNull, ThresholdReplace, apply_steps, coerce_numeric,
};
pub use normalize::{Normalizer, RenameMap, Substitution};
pub use reshape::{OUTCOME_COLUMNS, PeriodField, ReshapeConfig, raw_event_totals, reshape_panel};
