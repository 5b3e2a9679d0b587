//! Fama-French 3/5/6-factor and Carhart 4-factor data from Kenneth French's
//! data library.
//!
//! Each file is a zip archive holding one CSV-like text file: a free-form
//! preamble, the monthly/daily/weekly block, then (for monthly files) an
//! "Annual Factors:" block. Momentum lives in a separate file and is joined
//! on the date token.

use crate::data::provider::{
    AliasTable, Frequency, Identity, Payload, RegionAware, RegionCatalog, Source, UrlSpec,
};
use crate::data::schema::TableSchema;
use crate::error::{DataError, DataResult};
use polars::prelude::*;
use std::collections::HashMap;
use std::io::{Cursor, Read};

const BASE_URL: &str = "https://mba.tuck.dartmouth.edu/pages/faculty/ken.french/ftp";

/// Values the library uses for missing observations.
const NULL_SENTINELS: [&str; 4] = ["-99.99", "-999", "-99.990", "-0.9999"];

const FREQUENCIES: [Frequency; 4] = [
    Frequency::Daily,
    Frequency::Weekly,
    Frequency::Monthly,
    Frequency::Yearly,
];

pub static REGIONS: RegionCatalog = RegionCatalog::new(
    &[
        "us",
        "emerging",
        "developed",
        "ex-us",
        "europe",
        "japan",
        "asia-pacific-ex-japan",
        "north-america",
    ],
    "us",
    AliasTable::new(&[
        ("usa", "us"),
        ("jpn", "japan"),
        ("north america", "north-america"),
        ("global ex usa", "ex-us"),
        ("developed ex us", "ex-us"),
        ("em", "emerging"),
        ("asia pacific ex japan", "asia-pacific-ex-japan"),
    ]),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfModel {
    Three,
    /// Carhart: three factors plus momentum.
    Four,
    Five,
    Six,
}

impl FfModel {
    fn has_profitability(self) -> bool {
        matches!(self, FfModel::Five | FfModel::Six)
    }

    fn has_momentum(self) -> bool {
        matches!(self, FfModel::Four | FfModel::Six)
    }
}

/// File name segment for a region.
fn region_file_name(region: &str) -> DataResult<&'static str> {
    Ok(match region {
        "us" => "US",
        "emerging" => "Emerging",
        "developed" => "Developed",
        "ex-us" => "Developed_ex_US",
        "europe" => "Europe",
        "japan" => "Japan",
        "asia-pacific-ex-japan" => "Asia_Pacific_ex_Japan",
        "north-america" => "North_America",
        other => {
            return Err(DataError::InvalidParameter(format!(
                "no Fama-French files for region '{other}'"
            )))
        }
    })
}

pub struct FamaFrench {
    model: FfModel,
    name: &'static str,
}

impl FamaFrench {
    pub fn new(model: FfModel) -> Self {
        let name = match model {
            FfModel::Three => "ff3",
            FfModel::Four => "ff4",
            FfModel::Five => "ff5",
            FfModel::Six => "ff6",
        };
        Self { model, name }
    }

    pub fn model(&self) -> FfModel {
        self.model
    }

    fn region<'a>(&self, identity: &'a Identity) -> &'a str {
        identity.region.as_deref().unwrap_or("us")
    }

    fn momentum_column(&self, identity: &Identity) -> Option<&'static str> {
        if !self.model.has_momentum() {
            return None;
        }
        Some(if self.region(identity) != "us" {
            "WML"
        } else if self.model == FfModel::Six {
            "UMD"
        } else {
            "MOM"
        })
    }

    /// Columns of the main factor file after the date token.
    fn factor_file_layout(&self, identity: &Identity) -> Vec<&'static str> {
        // emerging markets only publish the five-factor file
        let five = self.model.has_profitability() || self.region(identity) == "emerging";
        let mut layout = vec!["Mkt-RF", "SMB", "HML"];
        if five {
            layout.extend(["RMW", "CMA"]);
        }
        layout.push("RF");
        layout
    }
}

impl Source for FamaFrench {
    fn name(&self) -> &str {
        self.name
    }

    fn frequencies(&self) -> &[Frequency] {
        &FREQUENCIES
    }

    fn precision(&self) -> u32 {
        6
    }

    fn schema(&self, identity: &Identity) -> TableSchema {
        let mut factors = vec!["Mkt-RF", "SMB", "HML"];
        if self.model.has_profitability() {
            factors.extend(["RMW", "CMA"]);
        }
        if let Some(mom) = self.momentum_column(identity) {
            factors.push(mom);
        }
        factors.push("RF");
        TableSchema::factor_table(&factors).allow_nulls()
    }

    fn validate(&self, identity: &Identity) -> DataResult<()> {
        let region = self.region(identity);
        region_file_name(region)?;
        let freq = identity.frequency;
        if freq == Frequency::Weekly && region != "us" {
            return Err(DataError::InvalidParameter(format!(
                "weekly data is not available for region {region}"
            )));
        }
        if region == "emerging" && freq != Frequency::Monthly {
            return Err(DataError::InvalidParameter(
                "emerging markets data is only available monthly".into(),
            ));
        }
        if freq == Frequency::Weekly && self.model != FfModel::Three {
            return Err(DataError::InvalidParameter(
                "weekly data is only available for the 3-factor model".into(),
            ));
        }
        Ok(())
    }

    fn regions(&self) -> Option<&dyn RegionAware> {
        Some(&REGIONS)
    }

    fn urls(&self, identity: &Identity) -> DataResult<UrlSpec> {
        let region = self.region(identity);
        let file_region = region_file_name(region)?;
        let freq = identity.frequency;

        let factors = match file_region {
            "Emerging" => "Emerging_5_Factors_CSV.zip".to_string(),
            "US" => {
                let base = if self.model.has_profitability() {
                    "F-F_Research_Data_5_Factors_2x3"
                } else {
                    "F-F_Research_Data_Factors"
                };
                let suffix = match freq {
                    Frequency::Daily => "_daily",
                    Frequency::Weekly => "_weekly",
                    _ => "",
                };
                format!("{base}{suffix}_CSV.zip")
            }
            intl => {
                let count = if self.model.has_profitability() { 5 } else { 3 };
                let daily = if freq == Frequency::Daily { "_Daily" } else { "" };
                format!("{intl}_{count}_Factors{daily}_CSV.zip")
            }
        };

        let mut urls = vec![("factors".to_string(), format!("{BASE_URL}/{factors}"))];
        if self.model.has_momentum() {
            let momentum = if file_region == "US" {
                let daily = if freq == Frequency::Daily { "_daily" } else { "" };
                format!("F-F_Momentum_Factor{daily}_CSV.zip")
            } else {
                let daily = if freq == Frequency::Daily { "_Daily" } else { "" };
                format!("{file_region}_Mom_Factor{daily}_CSV.zip")
            };
            urls.push(("momentum".to_string(), format!("{BASE_URL}/{momentum}")));
        }
        Ok(UrlSpec::Named(urls))
    }

    fn read(&self, payload: &Payload, identity: &Identity) -> DataResult<DataFrame> {
        let yearly = identity.frequency == Frequency::Yearly;
        let layout = self.factor_file_layout(identity);

        let text = unzip_first(payload.require("factors")?)?;
        let mut rows = parse_rows(&text, yearly, layout.len())?;

        if let Some(mom) = self.momentum_column(identity) {
            let text = unzip_first(payload.require("momentum")?)?;
            let momentum: HashMap<String, Option<f64>> = parse_rows(&text, yearly, 1)?
                .into_iter()
                .map(|(token, values)| (token, values[0]))
                .collect();
            rows.retain(|(token, _)| momentum.contains_key(token));
            for (token, values) in rows.iter_mut() {
                values.push(momentum.get(token).copied().flatten());
            }
            let mut with_mom = layout.clone();
            with_mom.push(mom);
            return build_frame(&rows, &with_mom, &self.schema(identity));
        }

        build_frame(&rows, &layout, &self.schema(identity))
    }
}

/// Text of the first member of a zip archive.
pub(crate) fn unzip_first(bytes: &[u8]) -> DataResult<String> {
    let mut archive = ::zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| DataError::Parse(format!("not a zip archive: {e}")))?;
    let mut member = archive
        .by_index(0)
        .map_err(|e| DataError::Parse(format!("empty zip archive: {e}")))?;
    let mut raw = Vec::new();
    member
        .read_to_end(&mut raw)
        .map_err(|e| DataError::Parse(format!("reading {}: {e}", member.name())))?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

type Row = (String, Vec<Option<f64>>);

/// Data rows of one block: lines whose first field is all digits.
fn parse_rows(text: &str, yearly: bool, width: usize) -> DataResult<Vec<Row>> {
    let lines: Vec<&str> = text.lines().collect();
    let marker = lines
        .iter()
        .position(|l| l.to_ascii_lowercase().contains("annual factors:"));
    let block = match (yearly, marker) {
        (true, Some(i)) => &lines[i + 1..],
        (false, Some(i)) => &lines[..i],
        (_, None) => &lines[..],
    };

    let mut rows = Vec::new();
    for line in block {
        let parts: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        let Some(token) = parts.first() else { continue };
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if parts.len() < width + 1 {
            return Err(DataError::Parse(format!(
                "row {token}: expected {width} values, found {}",
                parts.len() - 1
            )));
        }
        let values = parts[1..=width]
            .iter()
            .map(|raw| parse_value(raw, token))
            .collect::<DataResult<Vec<_>>>()?;
        rows.push((token.to_string(), values));
    }
    if rows.is_empty() {
        return Err(DataError::Parse("no data rows found".into()));
    }
    Ok(rows)
}

fn parse_value(raw: &str, token: &str) -> DataResult<Option<f64>> {
    if raw.is_empty() || NULL_SENTINELS.contains(&raw) {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| DataError::Parse(format!("row {token}: '{raw}' is not a number")))
}

/// Raw frame: date tokens followed by the schema's factor columns.
fn build_frame(rows: &[Row], layout: &[&str], schema: &TableSchema) -> DataResult<DataFrame> {
    let mut columns = vec![Column::new(
        "date".into(),
        rows.iter().map(|(t, _)| t.as_str()).collect::<Vec<_>>(),
    )];
    for name in schema.factor_names() {
        let idx = layout
            .iter()
            .position(|c| *c == name)
            .ok_or_else(|| DataError::Parse(format!("file has no {name} column")))?;
        let values: Vec<Option<f64>> = rows.iter().map(|(_, v)| v[idx]).collect();
        columns.push(Column::new(name.into(), values));
    }
    Ok(DataFrame::new(columns)?)
}
