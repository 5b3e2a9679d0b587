//! Stateless table transforms shared by every dataset.
//!
//! Each function takes a table and returns a new one; nothing here knows
//! which source a table came from.

use crate::error::{DataError, DataResult};
use chrono::NaiveDate;
use polars::prelude::*;

use super::align::DateRange;
use super::schema::{date_to_days, days_to_date};

/// Risk-free rate series. Always rounded to [`RISK_FREE_PRECISION`] digits and
/// placed last, later names taking the final position over earlier ones.
pub const RISK_FREE: [&str; 4] = ["RF", "R_F", "RF_Q", "RF_AQR"];

pub const RISK_FREE_PRECISION: u32 = 4;

/// Primary excess-return column, placed right after `date`.
pub const PRIMARY: &str = "Mkt-RF";

pub fn is_risk_free(name: &str) -> bool {
    RISK_FREE.iter().any(|rf| rf.eq_ignore_ascii_case(name))
}

fn map_float_columns(
    mut df: DataFrame,
    f: impl Fn(&str, f64) -> f64,
) -> DataResult<DataFrame> {
    let targets: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|c| c.dtype().is_float())
        .map(|c| c.name().to_string())
        .collect();

    for name in targets {
        let column = df.column(&name)?.cast(&DataType::Float64)?;
        let mapped: Float64Chunked = column
            .f64()?
            .iter()
            .map(|v| v.map(|x| f(&name, x)))
            .collect();
        df.with_column(mapped.with_name(name.as_str().into()).into_series())?;
    }
    Ok(df)
}

/// Divide every float column by 100 (5.2 -> 0.052). Other columns are untouched.
pub fn scale_to_decimal(df: DataFrame) -> DataResult<DataFrame> {
    map_float_columns(df, |_, x| x / 100.0)
}

/// Round half to even at `digits` decimal places.
pub fn round_half_even(value: f64, digits: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(digits as i32);
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    // decimal ties land a few ulps either side of .5 after scaling
    let floor = scaled.floor();
    let rounded = if (scaled - floor - 0.5).abs() < 1e-9 {
        if floor % 2.0 == 0.0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        scaled.round()
    };
    rounded / factor
}

/// Round every float column to `precision` digits, risk-free columns to 4.
pub fn round_to_precision(df: DataFrame, precision: u32) -> DataResult<DataFrame> {
    map_float_columns(df, |name, x| {
        let digits = if is_risk_free(name) {
            RISK_FREE_PRECISION
        } else {
            precision
        };
        round_half_even(x, digits)
    })
}

/// Canonical column order.
///
/// `date`, the primary excess-return column, remaining columns in source
/// order, then risk-free columns in [`RISK_FREE`] order.
pub fn canonical_order(names: &[&str]) -> Vec<String> {
    let front: Vec<&str> = ["date", PRIMARY]
        .into_iter()
        .filter(|c| names.contains(c))
        .collect();
    let back: Vec<&str> = RISK_FREE
        .into_iter()
        .filter(|c| names.contains(c))
        .collect();
    let middle = names
        .iter()
        .copied()
        .filter(|c| !front.contains(c) && !back.contains(c));

    front
        .iter()
        .copied()
        .chain(middle)
        .chain(back.iter().copied())
        .map(str::to_string)
        .collect()
}

pub fn rearrange_columns(df: DataFrame) -> DataResult<DataFrame> {
    let names: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    Ok(df.select(canonical_order(&refs))?)
}

/// Stable ascending sort on `date`.
pub fn sort_by_date(df: DataFrame) -> DataResult<DataFrame> {
    Ok(df
        .lazy()
        .sort(["date"], SortMultipleOptions::default().with_maintain_order(true))
        .collect()?)
}

/// Drop rows holding a null in any column.
pub fn drop_null_rows(df: DataFrame) -> DataResult<DataFrame> {
    let mut mask = BooleanChunked::full("mask".into(), true, df.height());
    for column in df.get_columns() {
        if column.null_count() > 0 {
            mask = &mask & &column.is_not_null();
        }
    }
    Ok(df.filter(&mask)?)
}

/// Keep rows whose `date` falls inside `range` (inclusive).
pub fn filter_by_date(df: &DataFrame, range: &DateRange) -> DataResult<DataFrame> {
    if range.is_unbounded() {
        return Ok(df.clone());
    }
    let lo = range.start.map(date_to_days);
    let hi = range.end.map(date_to_days);
    let mask: BooleanChunked = df
        .column("date")?
        .date()?
        .iter()
        .map(|day| match day {
            Some(day) => lo.map_or(true, |l| day >= l) && hi.map_or(true, |h| day <= h),
            None => false,
        })
        .collect();
    Ok(df.filter(&mask)?)
}

/// Resolve requested names case-insensitively against the table's columns.
///
/// `date` is implied and ignored if requested. Unknown names are an
/// `InvalidParameter` error listing every miss.
pub fn resolve_columns(available: &[&str], requested: &[String]) -> DataResult<Vec<String>> {
    let mut resolved: Vec<String> = Vec::new();
    let mut missing = Vec::new();
    for name in requested {
        if name.eq_ignore_ascii_case("date") {
            continue;
        }
        match available.iter().find(|a| a.eq_ignore_ascii_case(name)) {
            Some(found) if !resolved.iter().any(|r| r == found) => resolved.push(found.to_string()),
            Some(_) => {}
            None => missing.push(name.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(DataError::InvalidParameter(format!(
            "columns not found: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        )));
    }
    Ok(resolved)
}

/// `date` plus the named factor columns, in the order given.
pub fn select_columns(df: &DataFrame, factors: &[String]) -> DataResult<DataFrame> {
    let mut names = vec!["date".to_string()];
    names.extend(factors.iter().filter(|f| *f != "date").cloned());
    Ok(df.select(names)?)
}

/// First and last date of a non-empty table.
pub fn date_span(df: &DataFrame) -> DataResult<Option<(NaiveDate, NaiveDate)>> {
    let dates = df.column("date")?.date()?;
    let first = dates.get(0);
    let last = dates.get(dates.len().saturating_sub(1));
    Ok(first
        .zip(last)
        .map(|(a, b)| (days_to_date(a), days_to_date(b))))
}
