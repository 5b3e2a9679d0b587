//! FactorLab Core: cached retrieval and normalization of academic factor data.
//!
//! This crate contains:
//! - A filesystem cache with HTTP validators and TTLs
//! - A revalidating HTTP client with scoped sessions and staged cache writes
//! - The `Source` strategy contract and a lazily computed `Dataset` engine
//! - Composite datasets inner-joined on date
//! - Table normalization (period-end dates, decimal units, rounding, column order)
//! - Fama-French and q-factor sources plus a model registry
//! - Built-in fixed-schema composites (Barillas-Shanken)

pub mod config;
pub mod data;
pub mod error;
pub mod sources;

pub use config::FactorLabConfig;
pub use data::{
    CacheStore, CompositeBuilder, CompositeDataset, Dataset, DateRange, Frequency, HttpClient,
    NormalizedTable, Source, TableSchema,
};
pub use error::{DataError, DataResult, ErrorKind, SchemaError};
pub use sources::SourceRegistry;
