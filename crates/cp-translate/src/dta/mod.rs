//! Native reader for Stata `.dta` files.
//!
//! Two on-disk families are supported:
//!
//! | Releases | Stata | Layout |
//! |---|---|---|
//! | 113, 114, 115 | 8 – 12 | fixed binary header ([`legacy`]) |
//! | 117, 118, 119 | 13 – 18 | XML-like tagged sections ([`tagged`]) |
//!
//! Numeric variables of every storage type become `f64` columns with Stata's
//! missing codes (`.`, `.a` … `.z`) mapped to `NaN`. Fixed-width strings and
//! `strL`s become string columns; empty strings are treated as missing.
//! Value labels are not applied.

pub mod buffer;
pub mod legacy;
pub mod tagged;

use std::path::Path;

use cp_core::{Column, Frame};

use buffer::DtaBuffer;

/// Error type for `.dta` parsing.
#[derive(Debug, thiserror::Error)]
pub enum DtaError {
    /// I/O error while reading the file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file ended before a field could be read.
    #[error("truncated file: need {need} bytes at offset {offset}, have {have}")]
    Truncated {
        /// Offset of the failed read.
        offset: usize,
        /// Bytes requested.
        need: usize,
        /// Bytes remaining.
        have: usize,
    },

    /// Release number outside the supported set.
    #[error("unsupported .dta release {0}")]
    UnsupportedRelease(u16),

    /// Structural problem (bad tag, bad type code, ...).
    #[error("malformed .dta file: {0}")]
    Malformed(String),

    /// Resulting frame could not be assembled.
    #[error("frame error: {0}")]
    Frame(String),
}

impl From<DtaError> for cp_core::Error {
    fn from(e: DtaError) -> Self {
        match e {
            DtaError::Io(io) => cp_core::Error::Io(io),
            DtaError::UnsupportedRelease(r) => {
                cp_core::Error::Unsupported(format!(".dta release {}", r))
            }
            other => cp_core::Error::Validation(other.to_string()),
        }
    }
}

/// Result alias for `.dta` parsing.
pub type Result<T> = std::result::Result<T, DtaError>;

/// Storage type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    /// Fixed-width string of the given byte length.
    Str(usize),
    /// Long string stored out-of-line (117+).
    StrL,
    /// 1-byte signed integer.
    Byte,
    /// 2-byte signed integer.
    Int,
    /// 4-byte signed integer.
    Long,
    /// 4-byte float.
    Float,
    /// 8-byte float.
    Double,
}

impl VarType {
    /// Bytes one cell occupies in a data record.
    pub fn width(self) -> usize {
        match self {
            VarType::Str(w) => w,
            VarType::StrL | VarType::Double => 8,
            VarType::Long | VarType::Float => 4,
            VarType::Int => 2,
            VarType::Byte => 1,
        }
    }
}

/// A variable's name and storage type.
#[derive(Debug, Clone)]
pub struct VarSpec {
    /// Variable name.
    pub name: String,
    /// Storage type.
    pub ty: VarType,
}

// Largest non-missing values per storage type; anything above is a missing code.
const MAX_BYTE: i8 = 100;
const MAX_INT: i16 = 32_740;
const MAX_LONG: i32 = 2_147_483_620;
const MAX_FLOAT: f32 = 1.701e38;
const MAX_DOUBLE: f64 = 8.988e307;

/// Parsed header information shared by both layouts.
#[derive(Debug, Clone)]
pub struct DtaHeader {
    /// File release (113 … 119).
    pub release: u16,
    /// Number of observations.
    pub n_obs: usize,
    /// Variables in file order.
    pub variables: Vec<VarSpec>,
}

/// Read a `.dta` file into a [`Frame`].
pub fn read_dta(path: &Path) -> Result<Frame> {
    let bytes = std::fs::read(path)?;
    read_dta_bytes(&bytes)
}

/// Parse `.dta` content held in memory.
pub fn read_dta_bytes(bytes: &[u8]) -> Result<Frame> {
    if bytes.starts_with(b"<stata_dta>") {
        tagged::parse(bytes)
    } else {
        legacy::parse(bytes)
    }
}

/// Column data accumulated while reading the data section.
pub(crate) enum RawColumn {
    Num(Vec<f64>),
    Str(Vec<Option<String>>),
    StrL(Vec<(u64, u64)>),
}

/// Read `n_obs` rows of fixed-width records.
///
/// `read_strl_ref` decodes the 8-byte `(v, o)` reference of a `strL` cell;
/// it is only called for [`VarType::StrL`] variables.
pub(crate) fn read_rows<F>(
    buf: &mut DtaBuffer<'_>,
    header: &DtaHeader,
    mut read_strl_ref: F,
) -> Result<Vec<RawColumn>>
where
    F: FnMut(&mut DtaBuffer<'_>) -> Result<(u64, u64)>,
{
    let n = header.n_obs;
    let row_width: usize = header.variables.iter().map(|v| v.ty.width()).sum();
    // The observation count comes from the header; check it against the
    // bytes actually present before sizing any buffer.
    let need = n
        .checked_mul(row_width)
        .ok_or_else(|| DtaError::Malformed(format!("{} observations of {} bytes overflow", n, row_width)))?;
    if need > buf.remaining() {
        return Err(DtaError::Truncated { offset: buf.pos(), need, have: buf.remaining() });
    }
    let n = if row_width == 0 { 0 } else { n };
    let mut cols: Vec<RawColumn> = header
        .variables
        .iter()
        .map(|v| match v.ty {
            VarType::Str(_) => RawColumn::Str(Vec::with_capacity(n)),
            VarType::StrL => RawColumn::StrL(Vec::with_capacity(n)),
            _ => RawColumn::Num(Vec::with_capacity(n)),
        })
        .collect();

    for _ in 0..n {
        for (var, col) in header.variables.iter().zip(cols.iter_mut()) {
            match (var.ty, col) {
                (VarType::Str(w), RawColumn::Str(out)) => {
                    let s = buf.read_fixed_str(w)?;
                    out.push(if s.is_empty() { None } else { Some(s) });
                }
                (VarType::StrL, RawColumn::StrL(out)) => out.push(read_strl_ref(buf)?),
                (VarType::Byte, RawColumn::Num(out)) => {
                    let v = buf.read_i8()?;
                    out.push(if v > MAX_BYTE { f64::NAN } else { v as f64 });
                }
                (VarType::Int, RawColumn::Num(out)) => {
                    let v = buf.read_i16()?;
                    out.push(if v > MAX_INT { f64::NAN } else { v as f64 });
                }
                (VarType::Long, RawColumn::Num(out)) => {
                    let v = buf.read_i32()?;
                    out.push(if v > MAX_LONG { f64::NAN } else { v as f64 });
                }
                (VarType::Float, RawColumn::Num(out)) => {
                    let v = buf.read_f32()?;
                    out.push(if !v.is_finite() || v > MAX_FLOAT { f64::NAN } else { v as f64 });
                }
                (VarType::Double, RawColumn::Num(out)) => {
                    let v = buf.read_f64()?;
                    out.push(if !v.is_finite() || v > MAX_DOUBLE { f64::NAN } else { v });
                }
                _ => unreachable!("column storage matches variable type by construction"),
            }
        }
    }
    Ok(cols)
}

/// Assemble the frame, resolving `strL` references through `lookup`.
pub(crate) fn build_frame<F>(header: &DtaHeader, cols: Vec<RawColumn>, lookup: F) -> Result<Frame>
where
    F: Fn(u64, u64) -> Option<String>,
{
    let mut frame = Frame::new();
    for (var, col) in header.variables.iter().zip(cols) {
        let column = match col {
            RawColumn::Num(v) => Column::Float(v),
            RawColumn::Str(v) => Column::Str(v),
            RawColumn::StrL(refs) => Column::Str(
                refs.into_iter()
                    .map(|(v, o)| {
                        if v == 0 && o == 0 {
                            None
                        } else {
                            lookup(v, o).filter(|s| !s.is_empty())
                        }
                    })
                    .collect(),
            ),
        };
        if frame.has_column(&var.name) {
            return Err(DtaError::Frame(format!("duplicate variable '{}'", var.name)));
        }
        frame.insert(var.name.clone(), column).map_err(|e| DtaError::Frame(e.to_string()))?;
    }
    log::debug!(
        "parsed .dta release {}: {} variables, {} observations",
        header.release,
        header.variables.len(),
        header.n_obs
    );
    Ok(frame)
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Writers for tiny synthetic `.dta` files used by the parser tests.

    /// Cell value for a synthetic file.
    pub enum Cell<'a> {
        Byte(i8),
        Int(i16),
        Long(i32),
        Float(f32),
        Double(f64),
        Str(&'a str),
    }

    pub fn pad(s: &str, n: usize) -> Vec<u8> {
        let mut v = s.as_bytes().to_vec();
        v.resize(n, 0);
        v
    }
}
