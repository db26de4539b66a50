use std::io::Read;
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1, Axis};
use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};

/// A CSV file as read from disk: a header row and string cells.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let table = Self::from_reader(std::fs::File::open(path)?)?;
        debug!(path = %path.display(), rows = table.rows.len(), columns = table.headers.len(), "read csv");
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let rows = reader
            .records()
            .map(|record| record.map(|r| r.iter().map(str::to_string).collect()))
            .collect::<std::result::Result<Vec<Vec<String>>, csv::Error>>()?;
        Ok(RawTable { headers, rows })
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| Error::MissingColumn(name.to_string()))
    }

    /// Removes currency symbols, thousands separators and whitespace from
    /// every cell of the named columns.
    pub fn strip_currency(&mut self, columns: &[&str]) -> Result<()> {
        let pattern = Regex::new(r"[$€£¥,\s]").map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let indices = columns
            .iter()
            .map(|c| self.column_index(c))
            .collect::<Result<Vec<_>>>()?;
        for row in &mut self.rows {
            for &i in &indices {
                if let Some(cell) = row.get_mut(i) {
                    *cell = pattern.replace_all(cell, "").into_owned();
                }
            }
        }
        Ok(())
    }

    /// Reverses row order, e.g. for exports listed newest first.
    pub fn reverse_rows(&mut self) {
        self.rows.reverse();
    }

    /// Parses the named columns as numbers. Empty cells become `NaN`.
    pub fn into_numeric(&self, columns: &[&str]) -> Result<Table> {
        let indices = columns
            .iter()
            .map(|c| self.column_index(c))
            .collect::<Result<Vec<_>>>()?;
        let mut values = Array2::<f64>::zeros((self.rows.len(), indices.len()));
        for (r, row) in self.rows.iter().enumerate() {
            for (c, &i) in indices.iter().enumerate() {
                let cell = row.get(i).map(String::as_str).unwrap_or("");
                values[[r, c]] = if cell.is_empty() {
                    f64::NAN
                } else {
                    cell.parse().map_err(|_| Error::Parse {
                        row: r + 1,
                        column: columns[c].to_string(),
                        value: cell.to_string(),
                    })?
                };
            }
        }
        Ok(Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            values,
        })
    }
}

/// Named numeric columns; `NaN` marks a missing value.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub values: Array2<f64>,
}

impl Table {
    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| Error::MissingColumn(name.to_string()))
    }

    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>> {
        Ok(self.values.column(self.column_index(name)?))
    }

    /// Appends a column; its length must match the row count.
    pub fn push_column(&mut self, name: &str, values: Array1<f64>) -> Result<()> {
        if values.len() != self.nrows() {
            return Err(Error::shape_mismatch("Table::push_column", self.nrows(), values.len()));
        }
        self.values.push_column(values.view())?;
        self.columns.push(name.to_string());
        Ok(())
    }

    /// The named columns, in the given order, as a `(rows, columns)` array.
    pub fn select(&self, columns: &[&str]) -> Result<Array2<f64>> {
        let indices = columns
            .iter()
            .map(|c| self.column_index(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.values.select(Axis(1), &indices))
    }

    /// Replaces every `0.0` in the named columns with `NaN`.
    ///
    /// Returns how many cells were replaced.
    pub fn replace_zeros_with_missing(&mut self, columns: &[&str]) -> Result<usize> {
        let mut replaced = 0;
        for name in columns {
            let index = self.column_index(name)?;
            for v in self.values.column_mut(index) {
                if *v == 0.0 {
                    *v = f64::NAN;
                    replaced += 1;
                }
            }
        }
        Ok(replaced)
    }

    /// Keeps only rows without missing values. Returns the number dropped.
    pub fn drop_incomplete_rows(&mut self) -> usize {
        let keep: Vec<usize> = self
            .values
            .outer_iter()
            .enumerate()
            .filter(|(_, row)| row.iter().all(|v| !v.is_nan()))
            .map(|(i, _)| i)
            .collect();
        let dropped = self.nrows() - keep.len();
        self.values = self.values.select(Axis(0), &keep);
        dropped
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }
}
