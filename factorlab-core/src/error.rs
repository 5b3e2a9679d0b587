//! Structured error types for the retrieval and normalization pipeline.
//!
//! These are designed to be displayable in CLI contexts and to let callers
//! tell an unreachable source apart from a source that changed shape.

use polars::prelude::{DataType, PolarsError};
use thiserror::Error;

pub type DataResult<T> = Result<T, DataError>;

/// Errors raised anywhere between the cache store and a normalized table.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("{url} rejected the request (HTTP {status})")]
    RemoteRejected { url: String, status: u16 },

    #[error("schema violation: {0}")]
    SchemaViolation(#[from] SchemaError),

    #[error("usage error: {0}")]
    Usage(String),

    #[error("join produced no overlapping dates for '{dataset}'")]
    JoinMismatch { dataset: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("table error: {0}")]
    Table(#[from] PolarsError),

    #[error("{dataset}: {source}")]
    Dataset {
        dataset: String,
        #[source]
        source: Box<DataError>,
    },
}

/// Coarse classification of a [`DataError`], with dataset wrappers removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CacheUnavailable,
    Network,
    RemoteRejected,
    SchemaViolation,
    Usage,
    JoinMismatch,
    Parse,
    InvalidParameter,
    Table,
}

impl DataError {
    /// Attach the name of the dataset the error surfaced in.
    ///
    /// An error already attributed to the same dataset is not wrapped twice.
    pub fn in_dataset(self, dataset: &str) -> Self {
        if let DataError::Dataset { dataset: inner, .. } = &self {
            if inner == dataset {
                return self;
            }
        }
        DataError::Dataset {
            dataset: dataset.to_string(),
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DataError::CacheUnavailable(_) => ErrorKind::CacheUnavailable,
            DataError::Network { .. } => ErrorKind::Network,
            DataError::RemoteRejected { .. } => ErrorKind::RemoteRejected,
            DataError::SchemaViolation(_) => ErrorKind::SchemaViolation,
            DataError::Usage(_) => ErrorKind::Usage,
            DataError::JoinMismatch { .. } => ErrorKind::JoinMismatch,
            DataError::Parse(_) => ErrorKind::Parse,
            DataError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            DataError::Table(_) => ErrorKind::Table,
            DataError::Dataset { source, .. } => source.kind(),
        }
    }

    /// The source could not be reached or refused to serve the request.
    pub fn is_unreachable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::RemoteRejected)
    }

    /// The source was reached but its content no longer has the expected shape.
    pub fn is_shape_change(&self) -> bool {
        matches!(self.kind(), ErrorKind::SchemaViolation | ErrorKind::Parse)
    }
}

/// Mismatches between a table and its declared schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("unexpected column: {0}")]
    UnexpectedColumn(String),

    #[error("expected {expected} columns, got {actual}")]
    ColumnCount { expected: usize, actual: usize },

    #[error("type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },

    #[error("column {column} contains {count} null value(s) but is not nullable")]
    UnexpectedNulls { column: String, count: usize },

    #[error("first column must be 'date', found '{0}'")]
    DateNotFirst(String),

    #[error("dates not strictly ascending at row {row}")]
    UnorderedDates { row: usize },

    #[error("duplicate date {0}")]
    DuplicateDate(chrono::NaiveDate),
}
