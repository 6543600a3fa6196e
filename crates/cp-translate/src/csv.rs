//! CSV import/export.
//!
//! A column becomes numeric when every non-missing cell parses as `f64`;
//! otherwise it is kept as strings. Empty cells, `.`, `NA` and `NaN` are
//! missing (Stata and pandas exports both use these spellings).

use std::path::Path;

use ::csv::{ReaderBuilder, WriterBuilder};
use cp_core::{Column, Error, Frame, Result};

fn csv_err(e: ::csv::Error) -> Error {
    Error::Validation(format!("CSV error: {}", e))
}

fn is_missing_token(s: &str) -> bool {
    matches!(s, "" | "." | "NA" | "NaN" | "nan")
}

/// Parse CSV text from any reader.
pub fn read_csv_from<R: std::io::Read>(reader: R) -> Result<Frame> {
    let mut rdr = ReaderBuilder::new().has_headers(true).trim(::csv::Trim::All).from_reader(reader);
    let headers: Vec<String> = rdr.headers().map_err(csv_err)?.iter().map(str::to_string).collect();

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for (line, record) in rdr.records().enumerate() {
        let record = record.map_err(csv_err)?;
        if record.len() != headers.len() {
            return Err(Error::Validation(format!(
                "CSV row {} has {} fields, header has {}",
                line + 2,
                record.len(),
                headers.len()
            )));
        }
        for (col, field) in cells.iter_mut().zip(record.iter()) {
            col.push(field.to_string());
        }
    }

    let mut frame = Frame::new();
    for (name, raw) in headers.into_iter().zip(cells) {
        let parsed: Option<Vec<f64>> = raw
            .iter()
            .map(|s| if is_missing_token(s) { Some(f64::NAN) } else { s.parse::<f64>().ok() })
            .collect();
        let column = match parsed {
            Some(values) => Column::Float(values),
            None => Column::Str(raw.into_iter().map(|s| (!is_missing_token(&s)).then_some(s)).collect()),
        };
        if frame.has_column(&name) {
            return Err(Error::Validation(format!("duplicate CSV column '{}'", name)));
        }
        frame.insert(name, column)?;
    }
    Ok(frame)
}

/// Read a CSV file.
pub fn read_csv(path: &Path) -> Result<Frame> {
    let file = std::fs::File::open(path)?;
    read_csv_from(file)
}

/// Write a frame as CSV. Missing values are written as empty cells.
pub fn write_csv(path: &Path, frame: &Frame) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_path(path).map_err(csv_err)?;
    wtr.write_record(frame.names()).map_err(csv_err)?;
    let cols: Vec<&Column> = frame.iter().map(|(_, c)| c).collect();
    for i in 0..frame.n_rows() {
        let row: Vec<String> = cols
            .iter()
            .map(|c| match c {
                Column::Float(v) if v[i].is_nan() => String::new(),
                Column::Float(v) => v[i].to_string(),
                Column::Str(v) => v[i].clone().unwrap_or_default(),
            })
            .collect();
        wtr.write_record(&row).map_err(csv_err)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_numeric_and_string_columns() {
        let text = "observ,barrio,rval1\n1,Once,350\n2,,.\n3,Belgrano,abc\n";
        let f = read_csv_from(text.as_bytes()).unwrap();
        assert_eq!(f.floats("observ").unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(f.strings("barrio").unwrap()[1], None);
        // one non-numeric cell keeps the column as strings; coercion happens downstream
        let vals = f.strings("rval1").unwrap();
        assert_eq!(vals[0].as_deref(), Some("350"));
        assert_eq!(vals[1], None);
    }

    #[test]
    fn missing_tokens_keep_column_numeric() {
        let text = "rsem1,rsem2\n2,NA\n.,4.5\nnan,\n";
        let f = read_csv_from(text.as_bytes()).unwrap();
        let a = f.floats("rsem1").unwrap();
        assert_eq!(a[0], 2.0);
        assert!(a[1].is_nan() && a[2].is_nan());
        let b = f.floats("rsem2").unwrap();
        assert!(b[0].is_nan() && b[2].is_nan());
        assert_eq!(b[1], 4.5);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let text = "a,b\n1,2\n3\n";
        assert!(read_csv_from(text.as_bytes()).is_err());
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.csv");
        let f = Frame::from_columns(vec![
            ("a", Column::Float(vec![1.5, f64::NAN])),
            ("s", Column::Str(vec![Some("x".into()), None])),
        ])
        .unwrap();
        write_csv(&path, &f).unwrap();
        let g = read_csv(&path).unwrap();
        assert_eq!(g.floats("a").unwrap()[0], 1.5);
        assert!(g.floats("a").unwrap()[1].is_nan());
        assert_eq!(g.strings("s").unwrap(), &[Some("x".to_string()), None]);
    }
}
