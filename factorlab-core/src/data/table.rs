//! Immutable normalized result table.

use crate::data::normalize::{date_span, is_risk_free, RISK_FREE_PRECISION};
use crate::data::schema::days_to_date;
use crate::error::DataResult;
use chrono::NaiveDate;
use polars::prelude::*;
use std::fmt;

/// Rows shown at each end of a preview.
pub const PREVIEW_ROWS: usize = 4;

/// A validated table in canonical shape.
///
/// Column 0 is `date` (strictly ascending, unique), float columns are rounded
/// and columns are in canonical order. The wrapper hands out clones and
/// borrows only, never mutable access.
#[derive(Debug, Clone)]
pub struct NormalizedTable {
    frame: DataFrame,
    precision: u32,
}

impl NormalizedTable {
    /// Wrap a frame that has already been normalized and validated.
    pub(crate) fn new(frame: DataFrame, precision: u32) -> Self {
        Self { frame, precision }
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn width(&self) -> usize {
        self.frame.width()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect()
    }

    /// Factor columns (everything but `date`).
    pub fn factors(&self) -> Vec<String> {
        self.column_names().into_iter().skip(1).collect()
    }

    pub fn dates(&self) -> DataResult<Vec<NaiveDate>> {
        Ok(self
            .frame
            .column("date")?
            .date()?
            .iter()
            .flatten()
            .map(days_to_date)
            .collect())
    }

    pub fn values(&self, column: &str) -> DataResult<Vec<Option<f64>>> {
        Ok(self.frame.column(column)?.f64()?.iter().collect())
    }

    /// First and last date.
    pub fn span(&self) -> DataResult<Option<(NaiveDate, NaiveDate)>> {
        date_span(&self.frame)
    }

    /// blake3 over column names and the textual value of every cell.
    ///
    /// Two runs yielding the same fingerprint saw identical upstream data.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for column in self.frame.get_columns() {
            hasher.update(column.name().as_bytes());
            hasher.update(&[0]);
            for i in 0..self.frame.height() {
                let cell = column
                    .get(i)
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                hasher.update(cell.as_bytes());
                hasher.update(&[0x1f]);
            }
            hasher.update(&[0x1e]);
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Head/tail text rendering.
    ///
    /// Shows `rows` rows from each end, or the whole table when it has at
    /// most `2 * rows + 5` rows. Risk-free columns print at 4 decimals.
    pub fn preview(&self, rows: usize) -> String {
        let height = self.frame.height();
        let columns = self.frame.get_columns();
        let show_all = height <= rows * 2 + 5;

        let row_ids: Vec<Option<usize>> = if show_all {
            (0..height).map(Some).collect()
        } else {
            (0..rows)
                .map(Some)
                .chain(std::iter::once(None))
                .chain((height - rows..height).map(Some))
                .collect()
        };

        let cells: Vec<Vec<String>> = columns
            .iter()
            .map(|c| {
                row_ids
                    .iter()
                    .flatten()
                    .map(|&i| self.format_cell(c, i))
                    .collect()
            })
            .collect();
        let widths: Vec<usize> = columns
            .iter()
            .zip(&cells)
            .map(|(c, vals)| {
                vals.iter()
                    .map(String::len)
                    .max()
                    .unwrap_or(0)
                    .max(c.name().len())
                    + 2
            })
            .collect();

        let mut out = String::new();
        for (i, c) in columns.iter().enumerate() {
            if i == 0 {
                out.push_str(&format!("{:<w$}", c.name().as_str(), w = widths[0]));
            } else {
                out.push_str(&format!("{:>w$}", c.name().as_str(), w = widths[i]));
            }
        }
        out.push('\n');

        let mut shown = 0;
        for id in &row_ids {
            if id.is_none() {
                out.push_str("[...]\n");
                continue;
            }
            for (ci, vals) in cells.iter().enumerate() {
                if ci == 0 {
                    out.push_str(&format!("{:<w$}", vals[shown], w = widths[0]));
                } else {
                    out.push_str(&format!("{:>w$}", vals[shown], w = widths[ci]));
                }
            }
            out.push('\n');
            shown += 1;
        }
        out.push_str(&format!("\n[{height} rows x {} columns]", columns.len()));
        out
    }

    fn format_cell(&self, column: &Column, row: usize) -> String {
        if column.name().as_str() == "date" {
            return column
                .date()
                .ok()
                .and_then(|d| d.get(row))
                .map(|d| days_to_date(d).to_string())
                .unwrap_or_else(|| "null".into());
        }
        match column.f64() {
            Ok(ca) => match ca.get(row) {
                Some(v) if v.is_nan() => "NaN".into(),
                Some(v) => {
                    let digits = if is_risk_free(column.name()) {
                        RISK_FREE_PRECISION
                    } else {
                        self.precision
                    } as usize;
                    format!("{v:.digits$}")
                }
                None => "NaN".into(),
            },
            Err(_) => column
                .get(row)
                .map(|v| v.to_string())
                .unwrap_or_else(|_| "null".into()),
        }
    }
}

impl fmt::Display for NormalizedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "[empty table: {}]", self.column_names().join(", "));
        }
        f.write_str(&self.preview(PREVIEW_ROWS))
    }
}
