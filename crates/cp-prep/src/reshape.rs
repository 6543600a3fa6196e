//! Wide theft sub-records → long block × period panel.
//!
//! The raw block file carries up to `n_slots` numbered theft records per
//! block (`theft_month_1`, `theft_hour_1`, `theft_value_1`, ...). Each
//! non-missing slot is one event. Events are counted per (block, period)
//! and split into value, time-of-day, day-of-week and corner buckets.

use cp_core::{Column, Error, Frame, Result};
use serde::{Deserialize, Serialize};

/// Which slot field holds the event period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodField {
    /// `{prefix}_month_{k}`
    Month,
    /// `{prefix}_week_{k}`
    Week,
}

impl PeriodField {
    fn as_str(self) -> &'static str {
        match self {
            PeriodField::Month => "month",
            PeriodField::Week => "week",
        }
    }
}

fn default_slot_prefix() -> String {
    "theft".to_string()
}
fn default_n_slots() -> usize {
    23
}
fn default_night_start() -> f64 {
    22.0
}
fn default_night_end() -> f64 {
    10.0
}
fn default_weekend_days() -> Vec<f64> {
    vec![6.0, 7.0]
}

/// Reshape configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReshapeConfig {
    /// Block id column.
    pub id_column: String,
    /// Slot column prefix.
    #[serde(default = "default_slot_prefix")]
    pub slot_prefix: String,
    /// Number of slots per block.
    #[serde(default = "default_n_slots")]
    pub n_slots: usize,
    /// Slot field used as the period.
    pub period_field: PeriodField,
    /// Periods emitted for every block, in output order.
    pub periods: Vec<f64>,
    /// Name of the period column in the output.
    pub period_column: String,
    /// Block-level columns repeated on every output row.
    #[serde(default)]
    pub static_columns: Vec<String>,
    /// Events with `value >= value_cutoff` are high value.
    pub value_cutoff: f64,
    /// Hours at or after this are night.
    #[serde(default = "default_night_start")]
    pub night_start: f64,
    /// Hours before this are night.
    #[serde(default = "default_night_end")]
    pub night_end: f64,
    /// Weekday codes counted as weekend.
    #[serde(default = "default_weekend_days")]
    pub weekend_days: Vec<f64>,
}

impl ReshapeConfig {
    fn slot_column(&self, field: &str, k: usize) -> String {
        format!("{}_{}_{}", self.slot_prefix, field, k)
    }

    fn validate(&self) -> Result<()> {
        if self.periods.is_empty() {
            return Err(Error::Validation("reshape needs at least one period".into()));
        }
        for (i, p) in self.periods.iter().enumerate() {
            if p.is_nan() || self.periods[..i].contains(p) {
                return Err(Error::Validation(format!("invalid or repeated period {}", p)));
            }
        }
        if self.n_slots == 0 {
            return Err(Error::Validation("n_slots must be at least 1".into()));
        }
        Ok(())
    }
}

/// Output bucket columns, in the order they appear in the panel.
pub const OUTCOME_COLUMNS: [&str; 11] = [
    "total_thefts",
    "thefts_hv",
    "thefts_lv",
    "thefts_night",
    "thefts_day",
    "thefts_weekday",
    "thefts_weekend",
    "thefts_corner",
    "diff_hv_lv",
    "diff_night_day",
    "diff_weekday_weekend",
];

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    total: f64,
    hv: f64,
    night: f64,
    weekend: f64,
    corner: f64,
}

struct Slot<'a> {
    period: &'a [f64],
    hour: Option<&'a [f64]>,
    weekday: Option<&'a [f64]>,
    value: Option<&'a [f64]>,
    corner: Option<&'a [f64]>,
}

fn optional_floats<'a>(frame: &'a Frame, name: &str) -> Result<Option<&'a [f64]>> {
    if frame.has_column(name) { frame.floats(name).map(Some) } else { Ok(None) }
}

fn slots<'a>(frame: &'a Frame, cfg: &ReshapeConfig) -> Result<Vec<Slot<'a>>> {
    let mut out = Vec::new();
    for k in 1..=cfg.n_slots {
        let period_name = cfg.slot_column(cfg.period_field.as_str(), k);
        if !frame.has_column(&period_name) {
            continue;
        }
        out.push(Slot {
            period: frame.floats(&period_name)?,
            hour: optional_floats(frame, &cfg.slot_column("hour", k))?,
            weekday: optional_floats(frame, &cfg.slot_column("weekday", k))?,
            value: optional_floats(frame, &cfg.slot_column("value", k))?,
            corner: optional_floats(frame, &cfg.slot_column("corner", k))?,
        });
    }
    Ok(out)
}

fn check_block_ids(frame: &Frame, cfg: &ReshapeConfig) -> Result<()> {
    let (codes, n_groups) = frame.group_codes(&cfg.id_column)?;
    if codes.iter().any(Option::is_none) {
        return Err(Error::Validation(format!("missing value in id column '{}'", cfg.id_column)));
    }
    if n_groups != codes.len() {
        return Err(Error::Validation(format!(
            "id column '{}' has {} rows but {} distinct blocks",
            cfg.id_column,
            codes.len(),
            n_groups
        )));
    }
    Ok(())
}

/// Reshape the wide block file into a long block × period panel.
///
/// Exactly one row per (block, period) for every configured period, in
/// block input order then period config order. Static columns are repeated.
pub fn reshape_panel(frame: &Frame, cfg: &ReshapeConfig) -> Result<Frame> {
    cfg.validate()?;
    check_block_ids(frame, cfg)?;
    let slots = slots(frame, cfg)?;
    if slots.is_empty() {
        log::warn!(
            "no '{}' slot columns found; every panel cell will be zero",
            cfg.slot_column(cfg.period_field.as_str(), 1)
        );
    }

    let n_blocks = frame.n_rows();
    let n_periods = cfg.periods.len();
    let mut cells = vec![Counts::default(); n_blocks * n_periods];
    let mut skipped = 0usize;

    for slot in &slots {
        for b in 0..n_blocks {
            let period = slot.period[b];
            if period.is_nan() {
                continue;
            }
            let Some(p) = cfg.periods.iter().position(|&q| q == period) else {
                skipped += 1;
                continue;
            };
            let cell = &mut cells[b * n_periods + p];
            cell.total += 1.0;
            // missing value is low, missing hour is day, missing weekday is weekday
            if let Some(v) = slot.value
                && v[b] >= cfg.value_cutoff
            {
                cell.hv += 1.0;
            }
            if let Some(h) = slot.hour
                && (h[b] < cfg.night_end || h[b] >= cfg.night_start)
            {
                cell.night += 1.0;
            }
            if let Some(d) = slot.weekday
                && cfg.weekend_days.contains(&d[b])
            {
                cell.weekend += 1.0;
            }
            if let Some(c) = slot.corner
                && c[b] == 1.0
            {
                cell.corner += 1.0;
            }
        }
    }
    if skipped > 0 {
        log::warn!("reshape: {} events outside the configured periods were skipped", skipped);
    }

    let rows: Vec<usize> = (0..n_blocks).flat_map(|b| std::iter::repeat_n(b, n_periods)).collect();
    let mut out = Frame::new();
    out.insert(cfg.id_column.clone(), frame.column(&cfg.id_column)?.take(&rows))?;
    out.insert_floats(
        cfg.period_column.clone(),
        (0..n_blocks).flat_map(|_| cfg.periods.iter().copied()).collect(),
    )?;
    for name in &cfg.static_columns {
        if name == &cfg.id_column || name == &cfg.period_column {
            continue;
        }
        out.insert(name.clone(), frame.column(name)?.take(&rows))?;
    }

    let col = |f: fn(&Counts) -> f64| -> Vec<f64> { cells.iter().map(f).collect() };
    let total = col(|c| c.total);
    let hv = col(|c| c.hv);
    let lv = col(|c| c.total - c.hv);
    let night = col(|c| c.night);
    let day = col(|c| c.total - c.night);
    let weekend = col(|c| c.weekend);
    let weekday = col(|c| c.total - c.weekend);
    let corner = col(|c| c.corner);
    let diff = |a: &[f64], b: &[f64]| -> Vec<f64> { a.iter().zip(b).map(|(x, y)| x - y).collect() };
    let diff_hv_lv = diff(&hv, &lv);
    let diff_night_day = diff(&night, &day);
    let diff_weekday_weekend = diff(&weekday, &weekend);

    for (name, values) in OUTCOME_COLUMNS.iter().zip([
        total,
        hv,
        lv,
        night,
        day,
        weekday,
        weekend,
        corner,
        diff_hv_lv,
        diff_night_day,
        diff_weekday_weekend,
    ]) {
        out.insert(*name, Column::Float(values))?;
    }
    log::debug!("reshaped {} blocks x {} periods into {} rows", n_blocks, n_periods, out.n_rows());
    Ok(out)
}

/// Per-block count of events whose period is configured, read directly
/// from the wide form. Same order as the input rows.
pub fn raw_event_totals(frame: &Frame, cfg: &ReshapeConfig) -> Result<Vec<f64>> {
    cfg.validate()?;
    let slots = slots(frame, cfg)?;
    let mut totals = vec![0.0; frame.n_rows()];
    for slot in &slots {
        for (t, p) in totals.iter_mut().zip(slot.period) {
            if cfg.periods.contains(p) {
                *t += 1.0;
            }
        }
    }
    Ok(totals)
}
