//! Date alignment.
//!
//! Upstream files label periods inconsistently (`1927`, `192607`, `20240131`,
//! `2024` + quarter `3`). Everything is turned into a calendar date at the
//! end of its period so joins and range filters line up across sources.

use crate::data::provider::Frequency;
use crate::data::schema::date_to_days;
use crate::error::{DataError, DataResult};
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use tracing::warn;

/// Last calendar day of the month containing `date`.
pub fn month_end(date: NaiveDate) -> NaiveDate {
    let (y, m) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|d| d.pred_opt())
        .unwrap_or(date)
}

/// Roll `date` forward to the last day of its period.
///
/// Daily and weekly dates are already exact and are returned unchanged.
pub fn period_end(date: NaiveDate, frequency: Frequency) -> NaiveDate {
    match frequency {
        Frequency::Daily | Frequency::Weekly => date,
        Frequency::Monthly => month_end(date),
        Frequency::Quarterly => {
            let quarter_end_month = ((date.month() - 1) / 3 + 1) * 3;
            NaiveDate::from_ymd_opt(date.year(), quarter_end_month, 1)
                .map(month_end)
                .unwrap_or(date)
        }
        Frequency::Yearly => NaiveDate::from_ymd_opt(date.year(), 12, 31).unwrap_or(date),
    }
}

fn digits(token: &str) -> String {
    token.chars().filter(char::is_ascii_digit).collect()
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

/// Interpret a source date token at the given frequency.
///
/// Accepted shapes (non-digits are ignored): `YYYY`, `YYYYQ`, `YYYYMM`,
/// `YYYYMMDD`. Year and month tokens are period markers; for monthly,
/// quarterly and yearly data the result is the last day of the period.
pub fn parse_period_token(token: &str, frequency: Frequency) -> DataResult<NaiveDate> {
    let raw = digits(token);
    let start = match raw.len() {
        8 => ymd(&raw[..4], &raw[4..6], &raw[6..]),
        6 => ymd(&raw[..4], &raw[4..], "1"),
        5 => {
            let quarter: u32 = raw[4..].parse().unwrap_or(0);
            if (1..=4).contains(&quarter) {
                ymd(&raw[..4], &(quarter * 3).to_string(), "1")
            } else {
                None
            }
        }
        4 => ymd(&raw, "1", "1"),
        _ => None,
    }
    .ok_or_else(|| DataError::Parse(format!("unrecognized date token '{token}'")))?;

    Ok(period_end(start, frequency))
}

/// Replace the first column of `df` with a `date` column of period-end dates.
///
/// The first column may hold tokens as strings or integers, or dates already.
pub fn align_period_end(mut df: DataFrame, frequency: Frequency) -> DataResult<DataFrame> {
    let Some(first) = df.get_columns().first() else {
        return Ok(df);
    };
    let tokens = first.cast(&DataType::String)?;
    let tokens = tokens.str()?;

    let mut days = Vec::with_capacity(tokens.len());
    for (row, token) in tokens.iter().enumerate() {
        let token =
            token.ok_or_else(|| DataError::Parse(format!("missing date at row {row}")))?;
        days.push(date_to_days(parse_period_token(token, frequency)?));
    }

    let dates = Column::new("date".into(), days).cast(&DataType::Date)?;
    df.replace_column(0, dates)?;
    Ok(df)
}

/// Parse a user-supplied range bound.
///
/// Accepts `YYYY`, `YYYYMM`, `YYYY-MM`, `YYYYMMDD`, `YYYY-MM-DD` and
/// `YYYY/MM/DD`. A start bound resolves to the first day of the period it
/// names, an end bound to the last day.
pub fn parse_input_date(input: &str, is_end: bool) -> DataResult<NaiveDate> {
    let trimmed = input.trim();
    let invalid = || {
        DataError::InvalidParameter(format!(
            "invalid date '{input}', use YYYY, YYYY-MM or YYYY-MM-DD"
        ))
    };

    let normalized = if trimmed.contains(['-', '/']) {
        let parts: Vec<&str> = trimmed.split(['-', '/']).collect();
        match parts.as_slice() {
            [y, m] => format!("{y}{m:0>2}"),
            [y, m, d] => format!("{y}{m:0>2}{d:0>2}"),
            _ => return Err(invalid()),
        }
    } else {
        trimmed.to_string()
    };
    if !normalized.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let date = match normalized.len() {
        4 if is_end => ymd(&normalized, "12", "31"),
        4 => ymd(&normalized, "1", "1"),
        6 => ymd(&normalized[..4], &normalized[4..], "1").map(|d| if is_end { month_end(d) } else { d }),
        8 => ymd(&normalized[..4], &normalized[4..6], &normalized[6..]),
        _ => None,
    };
    date.ok_or_else(invalid)
}

/// Inclusive date bounds applied when a table is viewed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub const UNBOUNDED: DateRange = DateRange {
        start: None,
        end: None,
    };

    /// Validate bounds against each other and against `today`.
    ///
    /// A start after the end or in the future is rejected; an end in the
    /// future is clamped to `today`.
    pub fn new(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        today: NaiveDate,
    ) -> DataResult<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(DataError::InvalidParameter(format!(
                    "start date ({s}) is after end date ({e})"
                )));
            }
        }
        if let Some(s) = start.filter(|s| *s > today) {
            return Err(DataError::InvalidParameter(format!(
                "start date is in the future ({s} > {today})"
            )));
        }
        let end = match end {
            Some(e) if e > today => {
                warn!(%e, %today, "end date is in the future, clamping to today");
                Some(today)
            }
            other => other,
        };
        Ok(Self { start, end })
    }

    /// Parse user input for both bounds.
    pub fn parse(start: Option<&str>, end: Option<&str>, today: NaiveDate) -> DataResult<Self> {
        let start = start.map(|s| parse_input_date(s, false)).transpose()?;
        let end = end.map(|e| parse_input_date(e, true)).transpose()?;
        Self::new(start, end, today)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn month_token_rolls_to_month_end() {
        assert_eq!(parse_period_token("202301", Frequency::Monthly).unwrap(), d(2023, 1, 31));
        assert_eq!(parse_period_token("202402", Frequency::Monthly).unwrap(), d(2024, 2, 29));
        assert_eq!(parse_period_token("192612", Frequency::Monthly).unwrap(), d(1926, 12, 31));
    }

    #[test]
    fn year_token_rolls_to_december_31() {
        assert_eq!(parse_period_token("2023", Frequency::Yearly).unwrap(), d(2023, 12, 31));
    }

    #[test]
    fn quarter_token_rolls_to_quarter_end() {
        assert_eq!(parse_period_token("20241", Frequency::Quarterly).unwrap(), d(2024, 3, 31));
        assert_eq!(parse_period_token("20233", Frequency::Quarterly).unwrap(), d(2023, 9, 30));
        assert!(parse_period_token("20235", Frequency::Quarterly).is_err());
    }

    #[test]
    fn daily_tokens_are_exact() {
        assert_eq!(parse_period_token("20240105", Frequency::Daily).unwrap(), d(2024, 1, 5));
        assert_eq!(parse_period_token("2024-01-05", Frequency::Weekly).unwrap(), d(2024, 1, 5));
        assert!(parse_period_token("2024013", Frequency::Daily).is_err());
        assert!(parse_period_token("20240230", Frequency::Daily).is_err());
    }

    #[test]
    fn align_replaces_first_column_with_dates() {
        let df = DataFrame::new(vec![
            Column::new("token".into(), vec!["202301", "202302"]),
            Column::new("SMB".into(), vec![1.0, 2.0]),
        ])
        .unwrap();

        let out = align_period_end(df, Frequency::Monthly).unwrap();
        assert_eq!(out.get_column_names()[0].as_str(), "date");
        assert_eq!(out.column("date").unwrap().dtype(), &DataType::Date);
        let days: Vec<Option<i32>> = out.column("date").unwrap().date().unwrap().iter().collect();
        assert_eq!(
            days,
            vec![Some(date_to_days(d(2023, 1, 31))), Some(date_to_days(d(2023, 2, 28)))]
        );
    }

    #[test]
    fn align_accepts_integer_tokens() {
        let df = DataFrame::new(vec![Column::new("date".into(), vec![1927i64, 1928])]).unwrap();
        let out = align_period_end(df, Frequency::Yearly).unwrap();
        let last = out.column("date").unwrap().date().unwrap().get(1).unwrap();
        assert_eq!(last, date_to_days(d(1928, 12, 31)));
    }

    #[test]
    fn user_dates_resolve_to_period_bounds() {
        assert_eq!(parse_input_date("2020", false).unwrap(), d(2020, 1, 1));
        assert_eq!(parse_input_date("2020", true).unwrap(), d(2020, 12, 31));
        assert_eq!(parse_input_date("2020-2", true).unwrap(), d(2020, 2, 29));
        assert_eq!(parse_input_date("201204", false).unwrap(), d(2012, 4, 1));
        assert_eq!(parse_input_date("2012/04/15", true).unwrap(), d(2012, 4, 15));
        assert_eq!(parse_input_date("20120415", false).unwrap(), d(2012, 4, 15));
        assert!(parse_input_date("April 2012", false).is_err());
        assert!(parse_input_date("2012-13", false).is_err());
    }

    #[test]
    fn range_validation() {
        let today = d(2025, 6, 30);

        let r = DateRange::parse(Some("2020"), Some("2030"), today).unwrap();
        assert_eq!(r.start, Some(d(2020, 1, 1)));
        assert_eq!(r.end, Some(today));

        assert!(DateRange::parse(Some("2021"), Some("2020"), today).is_err());
        assert!(DateRange::parse(Some("2026"), None, today).is_err());

        let open = DateRange::parse(None, None, today).unwrap();
        assert!(open.is_unbounded());
        assert!(open.contains(d(1900, 1, 1)));
        assert!(r.contains(d(2020, 1, 1)) && !r.contains(d(2019, 12, 31)));
    }
}
