//! Composite datasets: columns drawn from several independently sourced
//! datasets, inner-joined on `date`.
//!
//! Construction opens exactly one HTTP session for all constituents and
//! either yields a complete table or fails as a whole. Constituent cache
//! writes are committed only once the composite has validated.

use crate::data::align::DateRange;
use crate::data::dataset::{drop_projection, extract_projection, project_and_filter, Dataset};
use crate::data::http::HttpClient;
use crate::data::normalize::{
    canonical_order, drop_null_rows, rearrange_columns, resolve_columns, round_to_precision,
    select_columns, sort_by_date,
};
use crate::data::provider::Frequency;
use crate::data::schema::{SchemaField, TableSchema};
use crate::data::table::NormalizedTable;
use crate::error::{DataError, DataResult};
use polars::prelude::*;
use std::fmt;
use tracing::{debug, info, warn};

/// Inner join on `date`: only dates present on both sides survive.
pub fn inner_join_on_date(left: DataFrame, right: DataFrame) -> DataResult<DataFrame> {
    Ok(left
        .lazy()
        .inner_join(right.lazy(), col("date"), col("date"))
        .collect()?)
}

#[derive(Debug)]
struct Constituent {
    dataset: Dataset,
    columns: Vec<String>,
}

/// Assembles a [`CompositeDataset`].
#[derive(Debug)]
pub struct CompositeBuilder {
    name: String,
    schema: TableSchema,
    constituents: Vec<Constituent>,
    keep_nulls: bool,
    precision: Option<u32>,
    range: DateRange,
}

impl CompositeBuilder {
    /// A composite with a fixed output schema.
    pub fn new(name: impl Into<String>, schema: TableSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            constituents: Vec::new(),
            keep_nulls: false,
            precision: None,
            range: DateRange::UNBOUNDED,
        }
    }

    /// Several datasets merged at one frequency.
    ///
    /// Each contributes the columns no earlier dataset already contributed;
    /// the output schema is the ordered union.
    pub fn collection(
        name: impl Into<String>,
        datasets: Vec<Dataset>,
        frequency: Frequency,
    ) -> DataResult<Self> {
        let name = name.into();
        let mut seen: Vec<String> = Vec::new();
        let mut constituents = Vec::new();

        for mut dataset in datasets {
            dataset
                .set_frequency(frequency)
                .map_err(|e| e.in_dataset(&name))?;
            let contributed: Vec<String> = dataset
                .schema()
                .factor_names()
                .into_iter()
                .filter(|c| !seen.iter().any(|s| s == c))
                .map(str::to_string)
                .collect();
            if contributed.is_empty() {
                warn!(
                    composite = %name,
                    dataset = dataset.name(),
                    "every column already present, skipping"
                );
                continue;
            }
            seen.extend(contributed.iter().cloned());
            constituents.push(Constituent {
                dataset,
                columns: contributed,
            });
        }

        let refs: Vec<&str> = std::iter::once("date")
            .chain(seen.iter().map(String::as_str))
            .collect();
        let fields = canonical_order(&refs)
            .into_iter()
            .map(|n| {
                let dtype = if n == "date" {
                    DataType::Date
                } else {
                    DataType::Float64
                };
                SchemaField::new(n, dtype)
            })
            .collect();

        let mut builder = Self::new(name, TableSchema::new(fields));
        builder.constituents = constituents;
        Ok(builder)
    }

    /// Add a dataset contributing `columns` (case-insensitive).
    ///
    /// Columns already contributed by an earlier constituent are rejected.
    pub fn constituent<S: AsRef<str>>(mut self, dataset: Dataset, columns: &[S]) -> DataResult<Self> {
        let schema = dataset.schema();
        let requested: Vec<String> = columns.iter().map(|c| c.as_ref().to_string()).collect();
        let resolved = resolve_columns(&schema.factor_names(), &requested)
            .map_err(|e| e.in_dataset(dataset.name()))?;
        if resolved.is_empty() {
            return Err(DataError::InvalidParameter(format!(
                "{} contributes no columns to {}",
                dataset.name(),
                self.name
            )));
        }
        for column in &resolved {
            if let Some(owner) = self
                .constituents
                .iter()
                .find(|c| c.columns.contains(column))
            {
                return Err(DataError::InvalidParameter(format!(
                    "column {column} already contributed by {}",
                    owner.dataset.name()
                )));
            }
        }
        self.constituents.push(Constituent {
            dataset,
            columns: resolved,
        });
        Ok(self)
    }

    /// Keep rows that still hold nulls after the join.
    pub fn keep_nulls(mut self, keep: bool) -> Self {
        self.keep_nulls = keep;
        self
    }

    pub fn precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    /// Load every constituent in one session, join, normalize and validate.
    pub fn build(self, http: &mut HttpClient) -> DataResult<CompositeDataset> {
        let CompositeBuilder {
            name,
            schema,
            mut constituents,
            keep_nulls,
            precision,
            range,
        } = self;

        let Some(first) = constituents.first() else {
            return Err(DataError::InvalidParameter(format!("{name} has no constituents")));
        };
        let frequency = first.dataset.frequency();
        if let Some(other) = constituents.iter().find(|c| c.dataset.frequency() != frequency) {
            return Err(DataError::InvalidParameter(format!(
                "{name}: {} is at frequency {}, expected {frequency}",
                other.dataset.name(),
                other.dataset.frequency()
            )));
        }
        let precision = precision.unwrap_or_else(|| first.dataset.precision());
        let schema = if keep_nulls { schema.allow_nulls() } else { schema };

        info!(composite = %name, constituents = constituents.len(), "building composite");

        let (table, fresh, pending) = http
            .session(|client| {
                let mut fresh = Vec::with_capacity(constituents.len());
                let mut pending = Vec::new();
                let mut joined: Option<DataFrame> = None;

                for constituent in &constituents {
                    let dataset = &constituent.dataset;
                    let table = match dataset.canonical() {
                        Some(table) => {
                            fresh.push(None);
                            table.clone()
                        }
                        None => {
                            let prepared = dataset.prepare(client)?;
                            pending.extend(prepared.pending);
                            fresh.push(Some(prepared.table.clone()));
                            prepared.table
                        }
                    };
                    let part = select_columns(table.frame(), &constituent.columns)?;
                    joined = Some(match joined {
                        None => part,
                        Some(acc) => inner_join_on_date(acc, part)?,
                    });
                    debug!(
                        composite = %name,
                        dataset = dataset.name(),
                        rows = joined.as_ref().map_or(0, DataFrame::height),
                        "joined constituent"
                    );
                }

                let joined = joined.unwrap_or_default();
                let table = finish(joined, &schema, precision, keep_nulls, &name)?;
                Ok((table, fresh, pending))
            })
            .map_err(|e| e.in_dataset(&name))?;

        for write in pending {
            http.commit(write);
        }
        for (constituent, table) in constituents.iter_mut().zip(fresh) {
            if let Some(table) = table {
                constituent.dataset.install(table);
            }
        }

        info!(composite = %name, rows = table.height(), cols = table.width(), "composite ready");
        Ok(CompositeDataset {
            name,
            schema,
            table,
            range,
            projection: None,
            constituents: constituents.into_iter().map(|c| c.dataset).collect(),
        })
    }
}

/// Cast to the output schema, then the shared normalization tail.
fn finish(
    joined: DataFrame,
    schema: &TableSchema,
    precision: u32,
    keep_nulls: bool,
    name: &str,
) -> DataResult<NormalizedTable> {
    let mut df = joined;
    for field in schema.fields() {
        let Ok(column) = df.column(&field.name) else {
            continue;
        };
        if column.dtype() != &field.dtype {
            let cast = column.cast(&field.dtype)?;
            df.with_column(cast)?;
        }
    }

    let df = sort_by_date(df)?;
    let df = round_to_precision(df, precision)?;
    let df = rearrange_columns(df)?;
    let df = if keep_nulls { df } else { drop_null_rows(df)? };

    if df.height() == 0 {
        return Err(DataError::JoinMismatch {
            dataset: name.to_string(),
        });
    }
    schema.validate(&df)?;
    Ok(NormalizedTable::new(df, precision))
}

/// A built composite. Immutable apart from its view settings.
pub struct CompositeDataset {
    name: String,
    schema: TableSchema,
    table: NormalizedTable,
    range: DateRange,
    projection: Option<Vec<String>>,
    constituents: Vec<Dataset>,
}

impl CompositeDataset {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// The full joined table.
    pub fn canonical(&self) -> &NormalizedTable {
        &self.table
    }

    /// The loaded constituents, for reuse.
    pub fn constituents(&self) -> &[Dataset] {
        &self.constituents
    }

    pub fn into_constituents(self) -> Vec<Dataset> {
        self.constituents
    }

    pub fn range(&self) -> DateRange {
        self.range
    }

    pub fn set_range(&mut self, range: DateRange) {
        self.range = range;
    }

    /// Projection and date range over the joined table.
    pub fn data(&self) -> DataResult<NormalizedTable> {
        project_and_filter(&self.table, self.projection.as_deref(), &self.range)
    }

    pub fn extract<S: AsRef<str>>(&mut self, names: &[S]) -> DataResult<()> {
        self.projection = Some(extract_projection(&self.schema.factor_names(), names)?);
        Ok(())
    }

    pub fn drop<S: AsRef<str>>(&mut self, names: &[S]) -> DataResult<()> {
        let visible = self.projection.clone().unwrap_or_else(|| self.table.factors());
        self.projection = Some(drop_projection(&visible, names)?);
        Ok(())
    }

    pub fn clear_projection(&mut self) {
        self.projection = None;
    }
}

impl fmt::Debug for CompositeDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeDataset")
            .field("name", &self.name)
            .field("rows", &self.table.height())
            .field("constituents", &self.constituents.iter().map(Dataset::name).collect::<Vec<_>>())
            .field("projection", &self.projection)
            .finish()
    }
}

impl fmt::Display for CompositeDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data() {
            Ok(table) => write!(f, "{table}"),
            Err(e) => write!(f, "<{}: {e}>", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(days: &[i32], name: &str, values: &[Option<f64>]) -> DataFrame {
        DataFrame::new(vec![
            Column::new("date".into(), days.to_vec()).cast(&DataType::Date).unwrap(),
            Column::new(name.into(), values.to_vec()),
        ])
        .unwrap()
    }

    #[test]
    fn inner_join_keeps_only_shared_dates() {
        let x = frame(&[1, 2, 3], "X", &[Some(1.0), Some(2.0), Some(3.0)]);
        let y = frame(&[2, 3, 4], "Y", &[Some(20.0), Some(30.0), Some(40.0)]);
        let joined = sort_by_date(inner_join_on_date(x, y).unwrap()).unwrap();
        let days: Vec<Option<i32>> = joined.column("date").unwrap().date().unwrap().iter().collect();
        assert_eq!(days, vec![Some(2), Some(3)]);
        assert_eq!(joined.width(), 3);
    }

    #[test]
    fn finish_drops_null_rows_unless_asked_not_to() {
        let schema = TableSchema::factor_table(&["X"]);
        let df = frame(&[1, 2], "X", &[Some(1.0), None]);

        let table = finish(df.clone(), &schema, 6, false, "c").unwrap();
        assert_eq!(table.height(), 1);

        let table = finish(df, &schema.clone().allow_nulls(), 6, true, "c").unwrap();
        assert_eq!(table.height(), 2);
    }

    #[test]
    fn empty_result_is_a_join_mismatch() {
        let schema = TableSchema::factor_table(&["X"]);
        let df = frame(&[1], "X", &[None]);
        let err = finish(df, &schema, 6, false, "combo").unwrap_err();
        assert!(matches!(err, DataError::JoinMismatch { ref dataset } if dataset == "combo"));
    }
}
