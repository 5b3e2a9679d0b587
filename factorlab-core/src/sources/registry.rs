//! Model key / alias lookup.

use crate::data::provider::Source;
use crate::error::{DataError, DataResult};
use crate::sources::fama_french::{FamaFrench, FfModel};
use crate::sources::q_factors::QFactors;
use std::collections::HashMap;
use std::sync::Arc;

/// One registered model.
pub struct RegistryEntry {
    pub key: &'static str,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    factory: fn() -> Arc<dyn Source>,
}

impl RegistryEntry {
    /// A fresh source instance for this model.
    pub fn create(&self) -> Arc<dyn Source> {
        (self.factory)()
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .finish()
    }
}

/// Immutable map from model keys and aliases to source factories.
#[derive(Debug)]
pub struct SourceRegistry {
    entries: Vec<RegistryEntry>,
    lookup: HashMap<String, usize>,
}

/// Lowercase, trimmed, with `-` and `_` removed.
pub(crate) fn lookup_key(input: &str) -> String {
    input
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .collect()
}

impl SourceRegistry {
    pub fn new(entries: Vec<RegistryEntry>) -> Self {
        let mut lookup = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            lookup.insert(lookup_key(entry.key), i);
            for alias in entry.aliases {
                lookup.insert(lookup_key(alias), i);
            }
        }
        Self { entries, lookup }
    }

    /// Every model this crate ships.
    pub fn standard() -> Self {
        Self::new(vec![
            RegistryEntry {
                key: "ff3",
                name: "Fama-French 3-Factor Model",
                aliases: &["3", "famafrench3"],
                factory: || Arc::new(FamaFrench::new(FfModel::Three)),
            },
            RegistryEntry {
                key: "ff4",
                name: "Carhart/Fama-French 4-Factors",
                aliases: &["4", "car", "carhart", "famafrench4"],
                factory: || Arc::new(FamaFrench::new(FfModel::Four)),
            },
            RegistryEntry {
                key: "ff5",
                name: "Fama-French 5-Factor Model",
                aliases: &["5", "famafrench5"],
                factory: || Arc::new(FamaFrench::new(FfModel::Five)),
            },
            RegistryEntry {
                key: "ff6",
                name: "Fama-French 6-Factor Model",
                aliases: &["6", "famafrench6"],
                factory: || Arc::new(FamaFrench::new(FfModel::Six)),
            },
            RegistryEntry {
                key: "q",
                name: "Hou-Xue-Zhang q5 Factors",
                aliases: &["q5", "hmxz", "qfactors"],
                factory: || Arc::new(QFactors::q5()),
            },
            RegistryEntry {
                key: "qc",
                name: "Hou-Xue-Zhang Classic q Factors",
                aliases: &["q4", "classicq", "qclassic"],
                factory: || Arc::new(QFactors::classic()),
            },
        ])
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn resolve(&self, input: &str) -> DataResult<&RegistryEntry> {
        self.lookup
            .get(&lookup_key(input))
            .map(|&i| &self.entries[i])
            .ok_or_else(|| {
                let keys: Vec<&str> = self.entries.iter().map(|e| e.key).collect();
                DataError::InvalidParameter(format!(
                    "unknown model '{input}' (available: {})",
                    keys.join(", ")
                ))
            })
    }

    /// Resolve `input` and instantiate its source.
    pub fn create(&self, input: &str) -> DataResult<Arc<dyn Source>> {
        Ok(self.resolve(input)?.create())
    }
}
