//! The source strategy contract.
//!
//! A `Source` supplies everything that varies per upstream dataset: the URL(s)
//! for a parameterization, a byte-to-raw-table parser, and the schema the
//! normalized output must satisfy. The generic `Dataset` engine drives it, so
//! sources can be swapped and mocked for tests.

use crate::data::schema::TableSchema;
use crate::error::{DataError, DataResult};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Native sampling frequency of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Frequency {
    #[serde(rename = "d", alias = "daily")]
    Daily,
    #[serde(rename = "w", alias = "weekly")]
    Weekly,
    #[default]
    #[serde(rename = "m", alias = "monthly")]
    Monthly,
    #[serde(rename = "q", alias = "quarterly")]
    Quarterly,
    #[serde(rename = "y", alias = "yearly", alias = "annual")]
    Yearly,
}

impl Frequency {
    pub const ALL: [Frequency; 5] = [
        Frequency::Daily,
        Frequency::Weekly,
        Frequency::Monthly,
        Frequency::Quarterly,
        Frequency::Yearly,
    ];

    /// One-letter code used in configuration and on the command line.
    pub fn code(self) -> &'static str {
        match self {
            Frequency::Daily => "d",
            Frequency::Weekly => "w",
            Frequency::Monthly => "m",
            Frequency::Quarterly => "q",
            Frequency::Yearly => "y",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Frequency {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "d" | "daily" => Ok(Frequency::Daily),
            "w" | "weekly" => Ok(Frequency::Weekly),
            "m" | "monthly" => Ok(Frequency::Monthly),
            "q" | "quarterly" => Ok(Frequency::Quarterly),
            "y" | "yearly" | "annual" => Ok(Frequency::Yearly),
            other => Err(DataError::InvalidParameter(format!(
                "unknown frequency '{other}' (expected one of d, w, m, q, y)"
            ))),
        }
    }
}

/// Magnitude convention of the values a source publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    /// 5.24 means 5.24%; scaled to 0.0524 during normalization.
    Percent,
    Decimal,
}

/// Parameters that determine the canonical table.
///
/// Changing any of these discards a computed table. The date range and cache
/// TTL are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub frequency: Frequency,
    pub region: Option<String>,
}

impl Identity {
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            region: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// Where a parameterization's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlSpec {
    Single(String),
    /// Ordered (name, url) pairs, e.g. a factor file plus a momentum file.
    Named(Vec<(String, String)>),
}

impl UrlSpec {
    pub fn urls(&self) -> Vec<&str> {
        match self {
            UrlSpec::Single(url) => vec![url.as_str()],
            UrlSpec::Named(pairs) => pairs.iter().map(|(_, url)| url.as_str()).collect(),
        }
    }
}

/// Downloaded bytes, shaped like the `UrlSpec` that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Single(Vec<u8>),
    Named(BTreeMap<String, Vec<u8>>),
}

impl Payload {
    /// Bytes of a single-URL payload.
    pub fn single(&self) -> DataResult<&[u8]> {
        match self {
            Payload::Single(bytes) => Ok(bytes),
            Payload::Named(_) => Err(DataError::Parse(
                "expected a single payload, got a named map".into(),
            )),
        }
    }

    /// Bytes of one named member of a multi-URL payload.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        match self {
            Payload::Named(map) => map.get(name).map(Vec::as_slice),
            Payload::Single(_) => None,
        }
    }

    pub fn require(&self, name: &str) -> DataResult<&[u8]> {
        self.get(name)
            .ok_or_else(|| DataError::Parse(format!("payload has no '{name}' member")))
    }
}

/// Strategy object for one upstream dataset family.
pub trait Source: Send + Sync {
    /// Short display name used in logs and error attribution.
    fn name(&self) -> &str;

    fn frequencies(&self) -> &[Frequency];

    /// Default rounding precision for non risk-free columns.
    fn precision(&self) -> u32 {
        8
    }

    fn units(&self) -> Units {
        Units::Percent
    }

    /// The exact shape of the normalized output.
    fn schema(&self, identity: &Identity) -> TableSchema;

    fn urls(&self, identity: &Identity) -> DataResult<UrlSpec>;

    /// Parse downloaded bytes into a raw table.
    ///
    /// The first column must be `date`, holding period tokens (`YYYY`,
    /// `YYYYQ`, `YYYYMM`, `YYYYMMDD`) or dates.
    fn read(&self, payload: &Payload, identity: &Identity) -> DataResult<DataFrame>;

    /// Reject parameter combinations the upstream does not publish.
    fn validate(&self, _identity: &Identity) -> DataResult<()> {
        Ok(())
    }

    /// Region capability, for sources published per region.
    fn regions(&self) -> Option<&dyn RegionAware> {
        None
    }
}

/// Capability of sources published for several regions.
pub trait RegionAware: Send + Sync {
    fn list_regions(&self) -> Vec<&str>;

    fn default_region(&self) -> &str;

    /// Canonical region name for user input, or `InvalidParameter`.
    fn resolve_alias(&self, input: &str) -> DataResult<String>;
}

/// Immutable alias -> canonical name lookup table.
#[derive(Debug, Clone, Copy)]
pub struct AliasTable {
    entries: &'static [(&'static str, &'static str)],
}

impl AliasTable {
    pub const fn new(entries: &'static [(&'static str, &'static str)]) -> Self {
        Self { entries }
    }

    pub fn get(&self, alias: &str) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(from, _)| *from == alias)
            .map(|(_, to)| *to)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.entries.iter().copied()
    }
}

/// Static region list with aliases, usable by composition in any source.
#[derive(Debug, Clone, Copy)]
pub struct RegionCatalog {
    regions: &'static [&'static str],
    default: &'static str,
    aliases: AliasTable,
}

impl RegionCatalog {
    pub const fn new(
        regions: &'static [&'static str],
        default: &'static str,
        aliases: AliasTable,
    ) -> Self {
        Self {
            regions,
            default,
            aliases,
        }
    }

    pub fn contains(&self, region: &str) -> bool {
        self.regions.contains(&region)
    }
}

impl RegionAware for RegionCatalog {
    fn list_regions(&self) -> Vec<&str> {
        self.regions.to_vec()
    }

    fn default_region(&self) -> &str {
        self.default
    }

    fn resolve_alias(&self, input: &str) -> DataResult<String> {
        let needle = input.trim().to_ascii_lowercase();
        if self.contains(&needle) {
            return Ok(needle);
        }
        match self.aliases.get(&needle) {
            Some(region) if self.contains(region) => Ok(region.to_string()),
            _ => Err(DataError::InvalidParameter(format!(
                "region '{input}' not supported (available: {})",
                self.regions.join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: RegionCatalog = RegionCatalog::new(
        &["us", "japan", "north-america"],
        "us",
        AliasTable::new(&[
            ("usa", "us"),
            ("jpn", "japan"),
            ("north america", "north-america"),
            ("uk", "gbr"),
        ]),
    );

    #[test]
    fn frequency_parses_codes_and_names() {
        assert_eq!("m".parse::<Frequency>().unwrap(), Frequency::Monthly);
        assert_eq!(" Daily ".parse::<Frequency>().unwrap(), Frequency::Daily);
        assert_eq!("annual".parse::<Frequency>().unwrap(), Frequency::Yearly);
        assert!(matches!(
            "hourly".parse::<Frequency>(),
            Err(DataError::InvalidParameter(_))
        ));
        for f in Frequency::ALL {
            assert_eq!(f.code().parse::<Frequency>().unwrap(), f);
        }
    }

    #[test]
    fn region_resolution_uses_direct_match_then_alias() {
        assert_eq!(CATALOG.resolve_alias("US").unwrap(), "us");
        assert_eq!(CATALOG.resolve_alias("jpn").unwrap(), "japan");
        assert_eq!(CATALOG.resolve_alias("North America").unwrap(), "north-america");
    }

    #[test]
    fn alias_to_unlisted_region_is_rejected() {
        let err = CATALOG.resolve_alias("uk").unwrap_err();
        assert!(err.to_string().contains("available: us, japan, north-america"));
        assert!(CATALOG.resolve_alias("mars").is_err());
    }

    #[test]
    fn payload_accessors() {
        let single = Payload::Single(b"abc".to_vec());
        assert_eq!(single.single().unwrap(), b"abc");
        assert!(single.get("factors").is_none());

        let mut map = BTreeMap::new();
        map.insert("factors".to_string(), b"f".to_vec());
        let named = Payload::Named(map);
        assert_eq!(named.require("factors").unwrap(), b"f");
        assert!(named.require("momentum").is_err());
        assert!(named.single().is_err());
    }
}
