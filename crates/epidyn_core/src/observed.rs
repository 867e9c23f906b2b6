//! Observed time series used as fitting targets.
//!
//! The first CSV column holds the sample time (`t` or `time`); every other
//! column is named after a model variable. Any subset of the variables may
//! be present.
//!
//! ```text
//! t,N1,N2
//! 0,10,10
//! 1,15.8,14.6
//! ```

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct ObservedData {
    /// Variable names, time column excluded.
    pub columns: Vec<String>,
    /// Strictly increasing sample times.
    pub times: Vec<f64>,
    /// `rows[i][j]` is column `j` observed at `times[i]`.
    pub rows: Vec<Vec<f64>>,
}

impl ObservedData {
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = rdr.headers().context("Failed to read CSV header")?.clone();

        let mut names = headers.iter();
        match names.next() {
            Some(first) if first.eq_ignore_ascii_case("t") || first.eq_ignore_ascii_case("time") => {}
            Some(other) => bail!("first column must be the time `t`, found `{other}`"),
            None => bail!("observed data has no header"),
        }
        let columns: Vec<String> = names.map(String::from).collect();
        if columns.is_empty() {
            bail!("observed data needs at least one variable column");
        }
        let mut seen = HashSet::new();
        for name in &columns {
            if !seen.insert(name.as_str()) {
                bail!("duplicate column `{name}`");
            }
        }

        let mut times: Vec<f64> = Vec::new();
        let mut rows = Vec::new();
        for (idx, record) in rdr.records().enumerate() {
            let row = idx + 1;
            let record = record.with_context(|| format!("Failed to read data row {row}"))?;
            let mut values = Vec::with_capacity(record.len());
            for (field, name) in record.iter().zip(headers.iter()) {
                let value: f64 = field.parse().with_context(|| {
                    format!("row {row}: `{field}` in column `{name}` is not a number")
                })?;
                if !value.is_finite() {
                    bail!("row {row}: column `{name}` is not finite");
                }
                values.push(value);
            }
            let t = values.remove(0);
            if let Some(&previous) = times.last() {
                if t <= previous {
                    bail!("row {row}: time {t} does not come after {previous}");
                }
            }
            times.push(t);
            rows.push(values);
        }
        if times.is_empty() {
            bail!("observed data has no rows");
        }

        Ok(Self {
            columns,
            times,
            rows,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open observed data {}", path.display()))?;
        Self::from_reader(file)
            .with_context(|| format!("Invalid observed data in {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn last_time(&self) -> Option<f64> {
        self.times.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ObservedData> {
        ObservedData::from_reader(text.as_bytes())
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected an error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected `{needle}` in error, got: {message}"
        );
    }

    #[test]
    fn reads_subset_of_columns_with_padding() {
        let data = parse("t, I ,S\n0, 1, 1000\n0.5,2.5,990.25\n").unwrap();
        assert_eq!(data.columns, vec!["I", "S"]);
        assert_eq!(data.times, vec![0.0, 0.5]);
        assert_eq!(data.rows[1], vec![2.5, 990.25]);
        assert_eq!(data.last_time(), Some(0.5));
    }

    #[test]
    fn rejects_bad_headers() {
        assert_err_contains(parse("x,I\n0,1\n"), "first column must be the time");
        assert_err_contains(parse("t\n0\n"), "at least one variable column");
        assert_err_contains(parse("t,I,I\n0,1,1\n"), "duplicate column `I`");
    }

    #[test]
    fn rejects_bad_rows() {
        assert_err_contains(parse("t,I\n0,one\n"), "`one` in column `I` is not a number");
        assert_err_contains(parse("t,I\n0,NaN\n"), "column `I` is not finite");
        assert_err_contains(parse("t,I\n1,1\n1,2\n"), "row 2: time 1 does not come after 1");
        assert_err_contains(parse("t,I\n0,1,2\n"), "Failed to read data row 1");
        assert_err_contains(parse("t,I\n"), "no rows");
    }
}
