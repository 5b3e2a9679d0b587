//! Hou-Xue-Zhang q-factor model (q5, and the classic four-factor q).

use crate::data::provider::{Frequency, Identity, Payload, Source, UrlSpec};
use crate::data::schema::TableSchema;
use crate::error::{DataError, DataResult};
use polars::prelude::*;

const BASE_URL: &str = "https://global-q.org/uploads/1/2/2/6/122679606";
const VINTAGE: u32 = 2024;

/// Upstream column order after the time columns, with the published names.
const UPSTREAM: [(&str, &str); 6] = [
    ("R_F", "RF_Q"),
    ("R_MKT", "Mkt-RF"),
    ("R_ME", "ME"),
    ("R_IA", "IA"),
    ("R_ROE", "ROE"),
    ("R_EG", "EG"),
];

const FREQUENCIES: [Frequency; 5] = Frequency::ALL;

pub struct QFactors {
    classic: bool,
}

impl QFactors {
    /// q5: market, size, investment, ROE and expected growth.
    pub fn q5() -> Self {
        Self { classic: false }
    }

    /// Classic q: q5 without expected growth.
    pub fn classic() -> Self {
        Self { classic: true }
    }

    fn columns(&self) -> &'static [(&'static str, &'static str)] {
        if self.classic {
            &UPSTREAM[..5]
        } else {
            &UPSTREAM
        }
    }
}

impl Source for QFactors {
    fn name(&self) -> &str {
        if self.classic {
            "qc"
        } else {
            "q"
        }
    }

    fn frequencies(&self) -> &[Frequency] {
        &FREQUENCIES
    }

    fn precision(&self) -> u32 {
        6
    }

    fn schema(&self, _identity: &Identity) -> TableSchema {
        let mut factors = vec!["Mkt-RF", "ME", "IA", "ROE"];
        if !self.classic {
            factors.push("EG");
        }
        factors.push("RF_Q");
        TableSchema::factor_table(&factors)
    }

    fn urls(&self, identity: &Identity) -> DataResult<UrlSpec> {
        let label = match identity.frequency {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Yearly => "annual",
        };
        Ok(UrlSpec::Single(format!(
            "{BASE_URL}/q5_factors_{label}_{VINTAGE}.csv"
        )))
    }

    fn read(&self, payload: &Payload, identity: &Identity) -> DataResult<DataFrame> {
        let freq = identity.frequency;
        // monthly and quarterly files carry year and period as separate columns
        let time_columns = match freq {
            Frequency::Monthly | Frequency::Quarterly => 2,
            _ => 1,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(payload.single()?);

        let mut tokens = Vec::new();
        let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); UPSTREAM.len()];
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| DataError::Parse(format!("csv: {e}")))?;
            if record.len() < time_columns + UPSTREAM.len() {
                return Err(DataError::Parse(format!(
                    "row {}: expected {} fields, found {}",
                    line + 1,
                    time_columns + UPSTREAM.len(),
                    record.len()
                )));
            }
            let token = match freq {
                Frequency::Monthly => format!("{}{:0>2}", &record[0], &record[1]),
                Frequency::Quarterly => format!("{}{}", &record[0], &record[1]),
                _ => record[0].to_string(),
            };
            tokens.push(token);
            for (i, column) in values.iter_mut().enumerate() {
                let raw = &record[time_columns + i];
                let value = if raw.is_empty() {
                    None
                } else {
                    Some(raw.parse::<f64>().map_err(|_| {
                        DataError::Parse(format!("row {}: '{raw}' is not a number", line + 1))
                    })?)
                };
                column.push(value);
            }
        }
        if tokens.is_empty() {
            return Err(DataError::Parse("no data rows found".into()));
        }

        let mut columns = vec![Column::new("date".into(), tokens)];
        for ((_, name), column) in self.columns().iter().zip(values) {
            columns.push(Column::new((*name).into(), column));
        }
        Ok(DataFrame::new(columns)?)
    }
}
