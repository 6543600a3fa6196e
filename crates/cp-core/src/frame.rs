//! Columnar frame used between every pipeline stage.
//!
//! A [`Frame`] is an ordered list of uniquely named, equal-length columns.
//! It is deliberately small: the preparation and inference crates only
//! need typed column access, row selection and renaming.

use std::collections::HashMap;

use crate::{Error, Result};

/// A single column of a [`Frame`].
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Numeric column; missing values are `NaN`.
    Float(Vec<f64>),
    /// String column; missing values are `None`.
    Str(Vec<Option<String>>),
}

impl Column {
    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Str(v) => v.len(),
        }
    }

    /// Whether the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short type name (`"float"` / `"str"`).
    pub fn dtype(&self) -> &'static str {
        match self {
            Column::Float(_) => "float",
            Column::Str(_) => "str",
        }
    }

    /// Numeric view, if this is a float column.
    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            Column::Float(v) => Some(v),
            Column::Str(_) => None,
        }
    }

    /// Number of missing entries.
    pub fn missing_count(&self) -> usize {
        match self {
            Column::Float(v) => v.iter().filter(|x| x.is_nan()).count(),
            Column::Str(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }

    /// Gather rows by index.
    pub fn take(&self, rows: &[usize]) -> Column {
        match self {
            Column::Float(v) => Column::Float(rows.iter().map(|&i| v[i]).collect()),
            Column::Str(v) => Column::Str(rows.iter().map(|&i| v[i].clone()).collect()),
        }
    }
}

/// Ordered collection of named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Frame {
    /// Empty frame (no columns, no rows).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a frame from `(name, column)` pairs.
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Column)>) -> Result<Self> {
        let mut frame = Frame::new();
        for (name, col) in columns {
            let name = name.into();
            if frame.has_column(&name) {
                return Err(Error::Validation(format!("duplicate column '{}'", name)));
            }
            frame.insert(name, col)?;
        }
        Ok(frame)
    }

    /// Number of rows (0 for a frame without columns).
    pub fn n_rows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    /// Number of columns.
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Whether the frame has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column names in order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Whether a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.position(name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| Error::NotFound(format!("column '{}'", name)))
    }

    /// Numeric column by name.
    pub fn floats(&self, name: &str) -> Result<&[f64]> {
        match self.column(name)? {
            Column::Float(v) => Ok(v),
            Column::Str(_) => {
                Err(Error::Validation(format!("column '{}' is not numeric", name)))
            }
        }
    }

    /// String column by name.
    pub fn strings(&self, name: &str) -> Result<&[Option<String>]> {
        match self.column(name)? {
            Column::Str(v) => Ok(v),
            Column::Float(_) => Err(Error::Validation(format!("column '{}' is not a string column", name))),
        }
    }

    /// Insert a column, replacing an existing column of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        if !self.columns.is_empty() && column.len() != self.n_rows() {
            return Err(Error::Validation(format!(
                "column '{}' has {} rows, frame has {}",
                name,
                column.len(),
                self.n_rows()
            )));
        }
        match self.position(&name) {
            Some(i) => self.columns[i] = column,
            None => {
                self.names.push(name);
                self.columns.push(column);
            }
        }
        Ok(())
    }

    /// Insert (or replace) a numeric column.
    pub fn insert_floats(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        self.insert(name, Column::Float(values))
    }

    /// Remove a column and return it.
    pub fn remove(&mut self, name: &str) -> Result<Column> {
        let i = self.position(name).ok_or_else(|| Error::NotFound(format!("column '{}'", name)))?;
        self.names.remove(i);
        Ok(self.columns.remove(i))
    }

    /// Rename every column through `f`. Two columns mapping to the same name is an error.
    pub fn rename_with<F>(&self, mut f: F) -> Result<Frame>
    where
        F: FnMut(&str) -> String,
    {
        let mut out = Frame::new();
        for (name, col) in self.iter() {
            let renamed = f(name);
            if out.has_column(&renamed) {
                return Err(Error::Validation(format!(
                    "renaming '{}' collides with existing column '{}'",
                    name, renamed
                )));
            }
            out.names.push(renamed);
            out.columns.push(col.clone());
        }
        Ok(out)
    }

    /// Keep only the listed columns, in the given order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Frame> {
        let mut out = Frame::new();
        for name in names {
            let name = name.as_ref();
            out.insert(name, self.column(name)?.clone())?;
        }
        Ok(out)
    }

    /// Gather rows by index (indices may repeat).
    pub fn take_rows(&self, rows: &[usize]) -> Frame {
        Frame {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.take(rows)).collect(),
        }
    }

    /// Keep rows where `mask` is true.
    pub fn filter(&self, mask: &[bool]) -> Result<Frame> {
        if mask.len() != self.n_rows() {
            return Err(Error::Validation(format!(
                "mask length ({}) != rows ({})",
                mask.len(),
                self.n_rows()
            )));
        }
        let rows: Vec<usize> =
            mask.iter().enumerate().filter_map(|(i, &keep)| keep.then_some(i)).collect();
        Ok(self.take_rows(&rows))
    }

    /// Iterate over `(name, column)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }

    /// Dense 0-based group codes for a key column, in order of first appearance.
    ///
    /// Works for numeric and string keys. Missing keys get `None`. Returns the
    /// codes and the number of distinct groups.
    pub fn group_codes<'a>(&'a self, name: &str) -> Result<(Vec<Option<usize>>, usize)> {
        let mut seen: HashMap<GroupKey<'a>, usize> = HashMap::new();
        let mut codes = Vec::with_capacity(self.n_rows());
        let mut push = |key: Option<GroupKey<'a>>| {
            codes.push(key.map(|k| {
                let next = seen.len();
                *seen.entry(k).or_insert(next)
            }));
        };
        match self.column(name)? {
            Column::Float(v) => {
                for &x in v {
                    push((!x.is_nan()).then(|| GroupKey::Num(normalize_bits(x))));
                }
            }
            Column::Str(v) => {
                for s in v {
                    push(s.as_deref().map(GroupKey::Text));
                }
            }
        }
        let n_groups = seen.len();
        Ok((codes, n_groups))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum GroupKey<'a> {
    Num(u64),
    Text(&'a str),
}

fn normalize_bits(x: f64) -> u64 {
    // -0.0 and 0.0 are the same group
    if x == 0.0 { 0.0f64.to_bits() } else { x.to_bits() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        Frame::from_columns(vec![
            ("block", Column::Float(vec![1.0, 2.0, 3.0])),
            ("street", Column::Str(vec![Some("a".into()), None, Some("c".into())])),
        ])
        .unwrap()
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut f = sample();
        f.insert_floats("block", vec![7.0, 8.0, 9.0]).unwrap();
        assert_eq!(f.names(), &["block".to_string(), "street".to_string()]);
        assert_eq!(f.floats("block").unwrap(), &[7.0, 8.0, 9.0]);
    }

    #[test]
    fn insert_rejects_wrong_length() {
        let mut f = sample();
        assert!(f.insert_floats("x", vec![1.0]).is_err());
    }

    #[test]
    fn typed_access_errors() {
        let f = sample();
        assert!(matches!(f.floats("street"), Err(Error::Validation(_))));
        assert!(matches!(f.floats("nope"), Err(Error::NotFound(_))));
        assert_eq!(f.column("street").unwrap().missing_count(), 1);
    }

    #[test]
    fn filter_and_take() {
        let f = sample();
        let g = f.filter(&[true, false, true]).unwrap();
        assert_eq!(g.n_rows(), 2);
        assert_eq!(g.floats("block").unwrap(), &[1.0, 3.0]);
        assert!(f.filter(&[true]).is_err());
    }

    #[test]
    fn group_codes_first_appearance() {
        let f = Frame::from_columns(vec![
            ("block", Column::Float(vec![30.0, 10.0, 30.0, f64::NAN, -0.0, 0.0])),
            ("street", Column::Str(vec![Some("b".into()), Some("a".into()), Some("b".into()), None, None, Some("a".into())])),
        ])
        .unwrap();
        let (codes, n) = f.group_codes("block").unwrap();
        assert_eq!(n, 3);
        assert_eq!(codes, vec![Some(0), Some(1), Some(0), None, Some(2), Some(2)]);
        let (codes, n) = f.group_codes("street").unwrap();
        assert_eq!(n, 2);
        assert_eq!(codes, vec![Some(0), Some(1), Some(0), None, None, Some(1)]);
    }

    #[test]
    fn rename_collision_is_error() {
        let f = sample();
        assert!(f.rename_with(|_| "same".to_string()).is_err());
        let g = f.rename_with(|n| n.to_uppercase()).unwrap();
        assert!(g.has_column("BLOCK"));
    }
}
