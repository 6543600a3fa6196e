//! Derived-variable generators.
//!
//! Each generator is a config record implementing [`FrameTransform`]. All of
//! them keep every row, are deterministic, and return a new frame.
//! [`GenerateStep`] wraps them in a serde-tagged enum so a study file can
//! list a pipeline of steps.

use std::str::FromStr;

use cp_core::{Column, Error, Frame, FrameTransform, Result};
use serde::{Deserialize, Serialize};

/// Comparison mode used by threshold-style generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    /// Strictly greater than.
    #[serde(rename = "gt", alias = ">")]
    Gt,
    /// Strictly less than.
    #[serde(rename = "lt", alias = "<")]
    Lt,
    /// Equal to.
    #[serde(rename = "eq", alias = "==")]
    Eq,
}

impl Comparison {
    /// Whether `value <cmp> threshold` holds. Missing values never match.
    #[inline]
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Lt => value < threshold,
            Comparison::Eq => value == threshold,
        }
    }
}

impl FromStr for Comparison {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "gt" | ">" | "greater" => Ok(Comparison::Gt),
            "lt" | "<" | "less" => Ok(Comparison::Lt),
            "eq" | "==" | "equal" => Ok(Comparison::Eq),
            other => Err(Error::Unsupported(format!("comparison mode '{}'", other))),
        }
    }
}

fn floats_or_missing(frame: &Frame, name: &str) -> Result<Vec<f64>> {
    if frame.has_column(name) {
        Ok(frame.floats(name)?.to_vec())
    } else {
        Ok(vec![f64::NAN; frame.n_rows()])
    }
}

/// One 0/1 column per integer in `start..=end`, flagging `source == i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedRangeDummies {
    /// Column compared against each integer.
    pub source: String,
    /// Output column prefix; columns are named `{prefix}{i}`.
    pub prefix: String,
    /// First integer (inclusive).
    pub start: i64,
    /// Last integer (inclusive).
    pub end: i64,
}

impl FrameTransform for FixedRangeDummies {
    fn apply(&self, frame: &Frame) -> Result<Frame> {
        if self.start > self.end {
            return Err(Error::Validation(format!(
                "dummy range {}..={} is empty",
                self.start, self.end
            )));
        }
        let source = frame.floats(&self.source)?;
        let mut out = frame.clone();
        for i in self.start..=self.end {
            let target = i as f64;
            let col: Vec<f64> =
                source.iter().map(|&v| if v == target { 1.0 } else { 0.0 }).collect();
            out.insert_floats(format!("{}{}", self.prefix, i), col)?;
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "fixed_range_dummies"
    }
}

/// Set `target` to `value` wherever `condition <comparison> threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdReplace {
    /// Column tested against the threshold.
    pub condition: String,
    /// Comparison mode.
    pub comparison: Comparison,
    /// Threshold value.
    pub threshold: f64,
    /// Column to overwrite (created as all-missing if absent).
    pub target: String,
    /// Replacement value.
    pub value: f64,
}

impl FrameTransform for ThresholdReplace {
    fn apply(&self, frame: &Frame) -> Result<Frame> {
        let cond = frame.floats(&self.condition)?;
        let mut target = floats_or_missing(frame, &self.target)?;
        let mut hits = 0usize;
        for (t, &c) in target.iter_mut().zip(cond) {
            if self.comparison.holds(c, self.threshold) {
                *t = self.value;
                hits += 1;
            }
        }
        log::debug!("threshold_replace: {} rows of '{}' set to {}", hits, self.target, self.value);
        let mut out = frame.clone();
        out.insert_floats(self.target.clone(), target)?;
        Ok(out)
    }

    fn name(&self) -> &str {
        "threshold_replace"
    }
}

fn one() -> f64 {
    1.0
}

/// A product column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// New column name.
    pub name: String,
    /// Columns multiplied elementwise (at least one).
    pub factors: Vec<String>,
    /// Constant multiplier.
    #[serde(default = "one")]
    pub scale: f64,
}

/// Interaction columns: elementwise products of existing columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaledCopies {
    /// Products to create, in order (later products may use earlier ones).
    pub products: Vec<Product>,
}

impl FrameTransform for ScaledCopies {
    fn apply(&self, frame: &Frame) -> Result<Frame> {
        let mut out = frame.clone();
        for p in &self.products {
            if p.factors.is_empty() {
                return Err(Error::Validation(format!("product '{}' has no factors", p.name)));
            }
            let mut acc = vec![p.scale; out.n_rows()];
            for factor in &p.factors {
                for (a, &v) in acc.iter_mut().zip(out.floats(factor)?) {
                    *a *= v;
                }
            }
            out.insert_floats(p.name.clone(), acc)?;
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "scaled_copies"
    }
}

/// A set of period values sharing one multiplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescaleBand {
    /// Period codes in this band.
    pub periods: Vec<f64>,
    /// Multiplier applied to rows in these periods.
    pub factor: f64,
}

/// Rescale `source` into `target` by a per-period multiplier (e.g. to a
/// 30-day-equivalent rate for months of unequal length).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiecewiseRescale {
    /// Column to rescale.
    pub source: String,
    /// Output column (may equal `source`).
    pub target: String,
    /// Period column.
    pub period_column: String,
    /// Disjoint bands; rows outside every band keep `source` unchanged.
    pub bands: Vec<RescaleBand>,
}

impl FrameTransform for PiecewiseRescale {
    fn apply(&self, frame: &Frame) -> Result<Frame> {
        if self.bands.is_empty() {
            return Err(Error::Validation("piecewise_rescale needs at least one band".into()));
        }
        let mut factor_of: Vec<(f64, f64)> = Vec::new();
        for band in &self.bands {
            for &p in &band.periods {
                if factor_of.iter().any(|(q, _)| *q == p) {
                    return Err(Error::Validation(format!("period {} appears in two bands", p)));
                }
                factor_of.push((p, band.factor));
            }
        }
        let source = frame.floats(&self.source)?;
        let period = frame.floats(&self.period_column)?;
        let rescaled: Vec<f64> = source
            .iter()
            .zip(period)
            .map(|(&v, &p)| match factor_of.iter().find(|(q, _)| *q == p) {
                Some((_, f)) => v * f,
                None => v,
            })
            .collect();
        let mut out = frame.clone();
        out.insert_floats(self.target.clone(), rescaled)?;
        Ok(out)
    }

    fn name(&self) -> &str {
        "piecewise_rescale"
    }
}

/// Null out `targets`, then back-fill `fill_target` from `source` where
/// `condition <comparison> cutoff`.
///
/// Used to split one pre/post quantity into separate columns that are
/// missing outside their own window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectiveNull {
    /// Columns initialized to missing.
    pub targets: Vec<String>,
    /// Which target receives `source` values (must be listed in `targets`).
    pub fill_target: String,
    /// Source of the back-filled values.
    pub source: String,
    /// Column tested against `cutoff`.
    pub condition: String,
    /// Comparison mode.
    pub comparison: Comparison,
    /// Cutoff value.
    pub cutoff: f64,
}

impl FrameTransform for SelectiveNull {
    fn apply(&self, frame: &Frame) -> Result<Frame> {
        if !self.targets.contains(&self.fill_target) {
            return Err(Error::Validation(format!(
                "fill_target '{}' is not one of the nulled targets",
                self.fill_target
            )));
        }
        let source = frame.floats(&self.source)?;
        let cond = frame.floats(&self.condition)?;
        let n = frame.n_rows();
        let mut out = frame.clone();
        for t in &self.targets {
            out.insert_floats(t.clone(), vec![f64::NAN; n])?;
        }
        let filled: Vec<f64> = source
            .iter()
            .zip(cond)
            .map(|(&s, &c)| if self.comparison.holds(c, self.cutoff) { s } else { f64::NAN })
            .collect();
        out.insert_floats(self.fill_target.clone(), filled)?;
        Ok(out)
    }

    fn name(&self) -> &str {
        "selective_null"
    }
}

/// Overwrite `target` with `group_sum(source) / scale` on rows where
/// `marker == code`.
///
/// The group sum is the final value of the group's running total over
/// `source` (missing values count as zero). Rows with a missing group key
/// and rows where the marker does not match are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedSum {
    /// Grouping key column (numeric or string).
    pub group_by: String,
    /// Column summed within each group.
    pub source: String,
    /// Column overwritten (created as all-missing if absent).
    pub target: String,
    /// Marker column.
    pub marker: String,
    /// Marker value selecting the rows to overwrite.
    pub code: f64,
    /// Divisor applied to the group sum.
    pub scale: f64,
}

impl FrameTransform for GroupedSum {
    fn apply(&self, frame: &Frame) -> Result<Frame> {
        if self.scale == 0.0 || !self.scale.is_finite() {
            return Err(Error::Validation(format!("grouped_sum scale must be finite and non-zero, got {}", self.scale)));
        }
        let (codes, n_groups) = frame.group_codes(&self.group_by)?;
        let source = frame.floats(&self.source)?;
        let marker = frame.floats(&self.marker)?;

        let mut sums = vec![0.0_f64; n_groups];
        for (code, &v) in codes.iter().zip(source) {
            if let Some(g) = code
                && !v.is_nan()
            {
                sums[*g] += v;
            }
        }

        let mut target = floats_or_missing(frame, &self.target)?;
        for ((t, code), &m) in target.iter_mut().zip(&codes).zip(marker) {
            if let Some(g) = code
                && m == self.code
            {
                *t = sums[*g] / self.scale;
            }
        }
        let mut out = frame.clone();
        out.insert_floats(self.target.clone(), target)?;
        Ok(out)
    }

    fn name(&self) -> &str {
        "grouped_sum"
    }
}

/// Convert string columns to numbers; unparsable cells become missing.
pub fn coerce_numeric<S: AsRef<str>>(frame: &Frame, columns: &[S]) -> Result<Frame> {
    let mut out = frame.clone();
    for name in columns {
        let name = name.as_ref();
        if let Column::Str(values) = frame.column(name)? {
            let mut failed = 0usize;
            let parsed: Vec<f64> = values
                .iter()
                .map(|s| match s.as_deref().map(str::trim) {
                    Some(t) if !t.is_empty() => t.parse::<f64>().unwrap_or_else(|_| {
                        failed += 1;
                        f64::NAN
                    }),
                    _ => f64::NAN,
                })
                .collect();
            if failed > 0 {
                log::warn!("coerce_numeric: {} values of '{}' were not numeric", failed, name);
            }
            out.insert_floats(name, parsed)?;
        }
    }
    Ok(out)
}

/// One configured generation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GenerateStep {
    /// See [`FixedRangeDummies`].
    FixedRangeDummies(FixedRangeDummies),
    /// See [`ThresholdReplace`].
    ThresholdReplace(ThresholdReplace),
    /// See [`ScaledCopies`].
    ScaledCopies(ScaledCopies),
    /// See [`PiecewiseRescale`].
    PiecewiseRescale(PiecewiseRescale),
    /// See [`SelectiveNull`].
    SelectiveNull(SelectiveNull),
    /// See [`GroupedSum`].
    GroupedSum(GroupedSum),
    /// See [`coerce_numeric`].
    CoerceNumeric {
        /// Columns to convert.
        columns: Vec<String>,
    },
}

impl FrameTransform for GenerateStep {
    fn apply(&self, frame: &Frame) -> Result<Frame> {
        match self {
            GenerateStep::FixedRangeDummies(s) => s.apply(frame),
            GenerateStep::ThresholdReplace(s) => s.apply(frame),
            GenerateStep::ScaledCopies(s) => s.apply(frame),
            GenerateStep::PiecewiseRescale(s) => s.apply(frame),
            GenerateStep::SelectiveNull(s) => s.apply(frame),
            GenerateStep::GroupedSum(s) => s.apply(frame),
            GenerateStep::CoerceNumeric { columns } => coerce_numeric(frame, columns),
        }
    }

    fn name(&self) -> &str {
        match self {
            GenerateStep::FixedRangeDummies(s) => s.name(),
            GenerateStep::ThresholdReplace(s) => s.name(),
            GenerateStep::ScaledCopies(s) => s.name(),
            GenerateStep::PiecewiseRescale(s) => s.name(),
            GenerateStep::SelectiveNull(s) => s.name(),
            GenerateStep::GroupedSum(s) => s.name(),
            GenerateStep::CoerceNumeric { .. } => "coerce_numeric",
        }
    }
}

/// Run steps in order.
pub fn apply_steps(frame: &Frame, steps: &[GenerateStep]) -> Result<Frame> {
    let mut current = frame.clone();
    for (i, step) in steps.iter().enumerate() {
        current = step.apply(&current)?;
        log::debug!("generate step {} ({}): {} columns", i, step.name(), current.n_cols());
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel() -> Frame {
        Frame::from_columns(vec![
            ("block", Column::Float(vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0])),
            ("month", Column::Float(vec![6.0, 7.0, 72.0, 6.0, 7.0, 72.0])),
            ("total_thefts", Column::Float(vec![1.0, 0.0, 2.0, 3.0, 1.0, f64::NAN])),
            ("jewish_inst", Column::Float(vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0])),
        ])
        .unwrap()
    }

    #[test]
    fn dummies_cover_range() {
        let step = FixedRangeDummies { source: "month".into(), prefix: "m".into(), start: 6, end: 8 };
        let f = step.apply(&panel()).unwrap();
        assert_eq!(f.floats("m6").unwrap(), &[1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(f.floats("m7").unwrap(), &[0.0, 1.0, 0.0, 0.0, 1.0, 0.0]);
        assert!(f.floats("m8").unwrap().iter().all(|&v| v == 0.0));
        assert_eq!(f.n_rows(), 6);
        let bad = FixedRangeDummies { source: "month".into(), prefix: "m".into(), start: 3, end: 2 };
        assert!(bad.apply(&panel()).is_err());
    }

    #[test]
    fn threshold_modes_are_exclusive() {
        let base = ThresholdReplace {
            condition: "month".into(),
            comparison: Comparison::Gt,
            threshold: 7.0,
            target: "post".into(),
            value: 1.0,
        };
        let f = base.apply(&panel()).unwrap();
        let post = f.floats("post").unwrap();
        assert_eq!(post[2], 1.0);
        assert!(post[0].is_nan() && post[1].is_nan());

        let eq = ThresholdReplace { comparison: Comparison::Eq, value: 9.0, ..base.clone() };
        let f = eq.apply(&panel()).unwrap();
        assert_eq!(f.floats("post").unwrap()[1], 9.0);
        assert!(f.floats("post").unwrap()[2].is_nan());

        let lt = ThresholdReplace { comparison: Comparison::Lt, ..base };
        let f = lt.apply(&panel()).unwrap();
        assert_eq!(f.floats("post").unwrap()[0], 1.0);
    }

    #[test]
    fn unknown_comparison_is_unsupported() {
        assert_eq!(">".parse::<Comparison>().unwrap(), Comparison::Gt);
        assert_eq!("eq".parse::<Comparison>().unwrap(), Comparison::Eq);
        assert!(matches!("geq".parse::<Comparison>(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn products_interact_columns() {
        let post = ThresholdReplace {
            condition: "month".into(),
            comparison: Comparison::Gt,
            threshold: 7.0,
            target: "post".into(),
            value: 1.0,
        };
        let zero = ThresholdReplace {
            condition: "month".into(),
            comparison: Comparison::Lt,
            threshold: 72.0,
            target: "post".into(),
            value: 0.0,
        };
        let f = apply_steps(
            &panel(),
            &[
                GenerateStep::ThresholdReplace(post),
                GenerateStep::ThresholdReplace(zero),
                GenerateStep::ScaledCopies(ScaledCopies {
                    products: vec![Product {
                        name: "same_block_police".into(),
                        factors: vec!["jewish_inst".into(), "post".into()],
                        scale: 1.0,
                    }],
                }),
            ],
        )
        .unwrap();
        assert_eq!(f.floats("same_block_police").unwrap(), &[0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn piecewise_rescale_bands() {
        let step = PiecewiseRescale {
            source: "total_thefts".into(),
            target: "thefts_30d".into(),
            period_column: "month".into(),
            bands: vec![
                RescaleBand { periods: vec![7.0], factor: 30.0 / 17.0 },
                RescaleBand { periods: vec![72.0], factor: 30.0 / 14.0 },
            ],
        };
        let f = step.apply(&panel()).unwrap();
        let r = f.floats("thefts_30d").unwrap();
        assert_eq!(r[0], 1.0);
        assert_eq!(r[1], 0.0);
        approx::assert_relative_eq!(r[2], 2.0 * 30.0 / 14.0);
        approx::assert_relative_eq!(r[4], 30.0 / 17.0);
        assert!(r[5].is_nan());

        let overlapping = PiecewiseRescale {
            bands: vec![
                RescaleBand { periods: vec![7.0], factor: 1.0 },
                RescaleBand { periods: vec![7.0], factor: 2.0 },
            ],
            ..step
        };
        assert!(overlapping.apply(&panel()).is_err());
    }

    #[test]
    fn selective_null_splits_window() {
        let step = SelectiveNull {
            targets: vec!["thefts_pre".into(), "thefts_post".into()],
            fill_target: "thefts_post".into(),
            source: "total_thefts".into(),
            condition: "month".into(),
            comparison: Comparison::Gt,
            cutoff: 7.0,
        };
        let f = step.apply(&panel()).unwrap();
        assert!(f.floats("thefts_pre").unwrap().iter().all(|v| v.is_nan()));
        let post = f.floats("thefts_post").unwrap();
        assert!(post[0].is_nan() && post[1].is_nan());
        assert_eq!(post[2], 2.0);

        let bad = SelectiveNull { fill_target: "other".into(), ..step };
        assert!(bad.apply(&panel()).is_err());
    }

    #[test]
    fn grouped_sum_only_touches_marked_rows() {
        let mut f = panel();
        f.insert_floats("july_total", vec![-1.0; 6]).unwrap();
        let step = GroupedSum {
            group_by: "block".into(),
            source: "total_thefts".into(),
            target: "july_total".into(),
            marker: "month".into(),
            code: 72.0,
            scale: 2.0,
        };
        let g = step.apply(&f).unwrap();
        let t = g.floats("july_total").unwrap();
        // block 1 sum = 3, block 2 sum = 4 (missing counts as zero)
        assert_eq!(t, &[-1.0, -1.0, 1.5, -1.0, -1.0, 2.0]);

        let zero = GroupedSum { scale: 0.0, ..step };
        assert!(zero.apply(&f).is_err());
    }

    #[test]
    fn coerce_numeric_marks_garbage_missing() {
        let f = Frame::from_columns(vec![(
            "theft_value_1",
            Column::Str(vec![Some("350".into()), Some(" 12.5 ".into()), Some("n/d".into()), None]),
        )])
        .unwrap();
        let g = coerce_numeric(&f, &["theft_value_1"]).unwrap();
        let v = g.floats("theft_value_1").unwrap();
        assert_eq!(&v[..2], &[350.0, 12.5]);
        assert!(v[2].is_nan() && v[3].is_nan());
    }

    #[test]
    fn steps_deserialize_from_yaml() {
        let yaml = r#"
- op: fixed_range_dummies
  source: month
  prefix: month_
  start: 4
  end: 12
- op: threshold_replace
  condition: month
  comparison: ">"
  threshold: 7
  target: post
  value: 1
- op: coerce_numeric
  columns: [total_thefts]
"#;
        let steps: Vec<GenerateStep> = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[1].name(), "threshold_replace");
        let bad = "- op: threshold_replace\n  condition: month\n  comparison: geq\n  threshold: 7\n  target: post\n  value: 1\n";
        assert!(serde_yaml_ng::from_str::<Vec<GenerateStep>>(bad).is_err());
    }
}
