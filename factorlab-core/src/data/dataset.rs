//! Generic dataset engine.
//!
//! A `Dataset` pairs a [`Source`] strategy with identity parameters and holds
//! the canonical table as an explicit state: `Absent` until the first load,
//! `Ready` afterwards. Any identity change is a transition back to `Absent`;
//! the on-disk HTTP cache is never touched by that transition.
//!
//! Pipeline (at most once per identity generation):
//! download -> parse -> align dates -> sort -> scale -> round -> reorder -> validate

use crate::data::align::{align_period_end, DateRange};
use crate::data::http::{Fetched, HttpClient, PendingWrite};
use crate::data::normalize::{
    filter_by_date, rearrange_columns, resolve_columns, round_to_precision, scale_to_decimal,
    select_columns, sort_by_date,
};
use crate::data::provider::{Frequency, Identity, Payload, Source, Units, UrlSpec};
use crate::data::schema::TableSchema;
use crate::data::table::NormalizedTable;
use crate::error::{DataError, DataResult};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default time-to-live for downloaded files.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(86_400);

/// In-memory canonical table state.
#[derive(Debug, Clone, Default)]
pub enum TableState {
    #[default]
    Absent,
    Ready(NormalizedTable),
}

/// A computed table plus the cache writes its downloads produced.
pub(crate) struct Prepared {
    pub table: NormalizedTable,
    pub pending: Vec<PendingWrite>,
}

pub struct Dataset {
    source: Arc<dyn Source>,
    identity: Identity,
    range: DateRange,
    cache_ttl: Duration,
    precision: Option<u32>,
    state: TableState,
    projection: Option<Vec<String>>,
}

impl Dataset {
    /// A dataset at `frequency`, in the source's default region if it has
    /// regions.
    pub fn new(source: Arc<dyn Source>, frequency: Frequency) -> DataResult<Self> {
        let region = source.regions().map(|r| r.default_region().to_string());
        let identity = Identity { frequency, region };
        check_identity(source.as_ref(), &identity).map_err(|e| e.in_dataset(source.name()))?;

        Ok(Self {
            source,
            identity,
            range: DateRange::UNBOUNDED,
            cache_ttl: DEFAULT_CACHE_TTL,
            precision: None,
            state: TableState::Absent,
            projection: None,
        })
    }

    pub fn with_region(mut self, region: &str) -> DataResult<Self> {
        self.set_region(region)?;
        Ok(self)
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.set_precision(Some(precision));
        self
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn frequency(&self) -> Frequency {
        self.identity.frequency
    }

    pub fn region(&self) -> Option<&str> {
        self.identity.region.as_deref()
    }

    pub fn range(&self) -> DateRange {
        self.range
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Effective rounding precision for non risk-free columns.
    pub fn precision(&self) -> u32 {
        self.precision.unwrap_or_else(|| self.source.precision())
    }

    pub fn schema(&self) -> TableSchema {
        self.source.schema(&self.identity)
    }

    pub fn list_regions(&self) -> Option<Vec<String>> {
        self.source
            .regions()
            .map(|r| r.list_regions().into_iter().map(str::to_string).collect())
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, TableState::Ready(_))
    }

    fn invalidate(&mut self, reason: &str) {
        if self.is_loaded() {
            info!(dataset = self.name(), "{reason}, discarding computed table");
        }
        self.state = TableState::Absent;
    }

    fn transition(&mut self, identity: Identity, reason: &str) -> DataResult<()> {
        if identity == self.identity {
            return Ok(());
        }
        check_identity(self.source.as_ref(), &identity).map_err(|e| e.in_dataset(self.name()))?;
        self.identity = identity;
        self.projection = None;
        self.invalidate(reason);
        Ok(())
    }

    pub fn set_frequency(&mut self, frequency: Frequency) -> DataResult<()> {
        let identity = Identity {
            frequency,
            ..self.identity.clone()
        };
        self.transition(identity, &format!("frequency changed to {frequency}"))
    }

    /// Switch region, resolving aliases through the source's region table.
    pub fn set_region(&mut self, region: &str) -> DataResult<()> {
        let Some(regions) = self.source.regions() else {
            return Err(DataError::InvalidParameter(format!(
                "{} is not published per region",
                self.name()
            )));
        };
        let resolved = regions.resolve_alias(region)?;
        let identity = Identity {
            region: Some(resolved.clone()),
            ..self.identity.clone()
        };
        self.transition(identity, &format!("region changed to {resolved}"))
    }

    pub fn set_precision(&mut self, precision: Option<u32>) {
        if precision != self.precision {
            self.precision = precision;
            self.invalidate("precision changed");
        }
    }

    /// Change the viewing range. The canonical table is kept.
    pub fn set_range(&mut self, range: DateRange) {
        self.range = range;
    }

    /// TTL for future downloads. The canonical table is kept.
    pub fn set_cache_ttl(&mut self, ttl: Duration) {
        self.cache_ttl = ttl;
    }

    /// Compute the canonical table if absent, inside a session of `http`.
    ///
    /// Cache writes are committed only after the table validated.
    pub fn load(&mut self, http: &mut HttpClient) -> DataResult<&NormalizedTable> {
        if !self.is_loaded() {
            let prepared = http.session(|client| self.prepare(client))?;
            for pending in prepared.pending {
                http.commit(pending);
            }
            self.install(prepared.table);
        }
        self.canonical_or_err()
    }

    /// Like [`load`](Self::load), reusing a session the caller already opened.
    pub fn load_with(&mut self, client: &HttpClient) -> DataResult<&NormalizedTable> {
        if !self.is_loaded() {
            let prepared = self.prepare(client)?;
            for pending in prepared.pending {
                client.commit(pending);
            }
            self.install(prepared.table);
        }
        self.canonical_or_err()
    }

    pub(crate) fn install(&mut self, table: NormalizedTable) {
        debug!(dataset = self.name(), rows = table.height(), "canonical table ready");
        self.state = TableState::Ready(table);
    }

    /// Run the full pipeline without mutating anything.
    pub(crate) fn prepare(&self, client: &HttpClient) -> DataResult<Prepared> {
        self.run_pipeline(client).map_err(|e| e.in_dataset(self.name()))
    }

    fn run_pipeline(&self, client: &HttpClient) -> DataResult<Prepared> {
        let identity = &self.identity;
        info!(
            dataset = self.name(),
            frequency = %identity.frequency,
            region = identity.region.as_deref().unwrap_or("-"),
            "loading dataset"
        );

        let mut pending = Vec::new();
        let payload = match self.source.urls(identity)? {
            UrlSpec::Single(url) => {
                let fetched = self.fetch(client, &url)?;
                pending.extend(fetched.pending);
                Payload::Single(fetched.bytes)
            }
            UrlSpec::Named(urls) => {
                let mut members = BTreeMap::new();
                for (name, url) in urls {
                    let fetched = self.fetch(client, &url)?;
                    pending.extend(fetched.pending);
                    members.insert(name, fetched.bytes);
                }
                Payload::Named(members)
            }
        };

        let raw = self.source.read(&payload, identity)?;
        let table = normalize_frame(
            raw,
            identity.frequency,
            self.source.units(),
            self.precision(),
            &self.schema(),
        )?;

        debug!(dataset = self.name(), rows = table.height(), cols = table.width(), "normalized");
        Ok(Prepared { table, pending })
    }

    /// Every body is streamed when the client has somewhere to report progress.
    fn fetch(&self, client: &HttpClient, url: &str) -> DataResult<Fetched> {
        if client.reports_progress() {
            client.fetch_streaming(url, self.cache_ttl, url)
        } else {
            client.fetch(url, self.cache_ttl)
        }
    }

    /// The full canonical table, if computed.
    pub fn canonical(&self) -> Option<&NormalizedTable> {
        match &self.state {
            TableState::Ready(table) => Some(table),
            TableState::Absent => None,
        }
    }

    fn canonical_or_err(&self) -> DataResult<&NormalizedTable> {
        self.canonical().ok_or_else(|| {
            DataError::Usage(format!("{} has not been loaded", self.name())).in_dataset(self.name())
        })
    }

    /// The canonical table with the projection and date range applied.
    pub fn data(&mut self, http: &mut HttpClient) -> DataResult<NormalizedTable> {
        self.load(http)?;
        self.view()
    }

    /// Projection and date range over an already computed table.
    pub fn view(&self) -> DataResult<NormalizedTable> {
        let table = self.canonical_or_err()?;
        project_and_filter(table, self.projection.as_deref(), &self.range)
    }

    /// Currently visible factor columns.
    pub fn visible_factors(&self) -> Vec<String> {
        self.projection.clone().unwrap_or_else(|| {
            self.schema()
                .factor_names()
                .into_iter()
                .map(str::to_string)
                .collect()
        })
    }

    pub fn projection(&self) -> Option<&[String]> {
        self.projection.as_deref()
    }

    /// Show only the named factors (case-insensitive), in the order given.
    pub fn extract<S: AsRef<str>>(&mut self, names: &[S]) -> DataResult<()> {
        let schema = self.schema();
        self.projection = Some(extract_projection(&schema.factor_names(), names)?);
        Ok(())
    }

    /// Hide the named factors (case-insensitive) from the current view.
    pub fn drop<S: AsRef<str>>(&mut self, names: &[S]) -> DataResult<()> {
        let visible = self.visible_factors();
        self.projection = Some(drop_projection(&visible, names)?);
        Ok(())
    }

    pub fn clear_projection(&mut self) {
        self.projection = None;
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("source", &self.name())
            .field("identity", &self.identity)
            .field("range", &self.range)
            .field("cache_ttl", &self.cache_ttl)
            .field("precision", &self.precision())
            .field("loaded", &self.is_loaded())
            .field("projection", &self.projection)
            .finish()
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.view() {
            Ok(table) => write!(f, "{table}"),
            Err(_) => write!(f, "<{} ({}) not loaded>", self.name(), self.frequency()),
        }
    }
}

fn check_identity(source: &dyn Source, identity: &Identity) -> DataResult<()> {
    if !source.frequencies().contains(&identity.frequency) {
        let supported: Vec<&str> = source.frequencies().iter().map(|f| f.code()).collect();
        return Err(DataError::InvalidParameter(format!(
            "frequency '{}' not available (supported: {})",
            identity.frequency,
            supported.join(", ")
        )));
    }
    source.validate(identity)
}

/// The shared normalization tail used by datasets and composites.
pub(crate) fn normalize_frame(
    raw: polars::prelude::DataFrame,
    frequency: Frequency,
    units: Units,
    precision: u32,
    schema: &TableSchema,
) -> DataResult<NormalizedTable> {
    let df = align_period_end(raw, frequency)?;
    let df = sort_by_date(df)?;
    let df = match units {
        Units::Percent => scale_to_decimal(df)?,
        Units::Decimal => df,
    };
    let df = round_to_precision(df, precision)?;
    let df = rearrange_columns(df)?;
    schema.validate(&df)?;
    Ok(NormalizedTable::new(df, precision))
}

pub(crate) fn project_and_filter(
    table: &NormalizedTable,
    projection: Option<&[String]>,
    range: &DateRange,
) -> DataResult<NormalizedTable> {
    let frame = match projection {
        Some(factors) => select_columns(table.frame(), factors)?,
        None => table.frame().clone(),
    };
    let frame = filter_by_date(&frame, range)?;
    Ok(NormalizedTable::new(frame, table.precision()))
}

pub(crate) fn extract_projection<S: AsRef<str>>(
    available: &[&str],
    names: &[S],
) -> DataResult<Vec<String>> {
    let requested: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
    let selected = resolve_columns(available, &requested)?;
    if selected.is_empty() {
        return Err(DataError::InvalidParameter(
            "extraction must include at least one factor".into(),
        ));
    }
    Ok(selected)
}

pub(crate) fn drop_projection<S: AsRef<str>>(
    visible: &[String],
    names: &[S],
) -> DataResult<Vec<String>> {
    let refs: Vec<&str> = visible.iter().map(String::as_str).collect();
    let requested: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
    let dropped = resolve_columns(&refs, &requested)?;
    let remaining: Vec<String> = visible
        .iter()
        .filter(|v| !dropped.contains(v))
        .cloned()
        .collect();
    if remaining.is_empty() {
        return Err(DataError::InvalidParameter(
            "cannot drop every factor column".into(),
        ));
    }
    Ok(remaining)
}
