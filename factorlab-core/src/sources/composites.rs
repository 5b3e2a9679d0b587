//! Built-in composites: fixed factor sets drawn from several models.

use crate::data::composite::CompositeBuilder;
use crate::data::dataset::Dataset;
use crate::data::provider::Frequency;
use crate::data::schema::TableSchema;
use crate::error::{DataError, DataResult};
use crate::sources::registry::{lookup_key, SourceRegistry};

/// One fixed-schema composite.
#[derive(Debug)]
pub struct CompositeEntry {
    pub key: &'static str,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub frequencies: &'static [Frequency],
    /// Output factors in column order, `date` excluded.
    pub factors: &'static [&'static str],
    /// Model key and the columns it contributes.
    pub parts: &'static [(&'static str, &'static [&'static str])],
}

/// Barillas and Shanken (2018): market and size from Fama-French,
/// investment and profitability from the q-factors.
pub const BARILLAS_SHANKEN: CompositeEntry = CompositeEntry {
    key: "bs",
    name: "Barillas-Shanken 6-Factor Model",
    aliases: &["barillasshanken", "bs6"],
    frequencies: &[Frequency::Daily, Frequency::Monthly],
    factors: &["Mkt-RF", "SMB", "IA", "ROE", "RF"],
    parts: &[("ff3", &["Mkt-RF", "SMB", "RF"]), ("q", &["IA", "ROE"])],
};

pub const STANDARD_COMPOSITES: &[CompositeEntry] = &[BARILLAS_SHANKEN];

impl CompositeEntry {
    pub fn supports(&self, frequency: Frequency) -> bool {
        self.frequencies.contains(&frequency)
    }

    /// An unbuilt composite at `frequency`.
    pub fn builder(&self, frequency: Frequency) -> DataResult<CompositeBuilder> {
        self.builder_with(&SourceRegistry::standard(), frequency, Ok)
    }

    /// Like [`builder`](Self::builder), passing each constituent through
    /// `configure` (TTL, precision) before it is added.
    pub fn builder_with<F>(
        &self,
        registry: &SourceRegistry,
        frequency: Frequency,
        mut configure: F,
    ) -> DataResult<CompositeBuilder>
    where
        F: FnMut(Dataset) -> DataResult<Dataset>,
    {
        if !self.supports(frequency) {
            let codes: Vec<&str> = self.frequencies.iter().map(|f| f.code()).collect();
            return Err(DataError::InvalidParameter(format!(
                "{} is not available at frequency {frequency} (available: {})",
                self.name,
                codes.join(", ")
            )));
        }

        let mut builder = CompositeBuilder::new(self.key, TableSchema::factor_table(self.factors));
        for &(model, columns) in self.parts {
            let dataset = Dataset::new(registry.create(model)?, frequency)?;
            builder = builder.constituent(configure(dataset)?, columns)?;
        }
        Ok(builder)
    }
}

/// The built-in composite registered under `input`, if any.
pub fn find_composite(input: &str) -> Option<&'static CompositeEntry> {
    let wanted = lookup_key(input);
    STANDARD_COMPOSITES.iter().find(|entry| {
        lookup_key(entry.key) == wanted || entry.aliases.iter().any(|a| lookup_key(a) == wanted)
    })
}
