//! Retrieval, caching and normalization

pub mod align;
pub mod cache;
pub mod composite;
pub mod dataset;
pub mod http;
pub mod normalize;
pub mod progress;
pub mod provider;
pub mod schema;
pub mod table;

pub use align::{align_period_end, parse_input_date, parse_period_token, period_end, DateRange};
pub use cache::{cache_key, CacheEntry, CacheMeta, CacheStore, Validators};
pub use composite::{inner_join_on_date, CompositeBuilder, CompositeDataset};
pub use dataset::{Dataset, TableState, DEFAULT_CACHE_TTL};
pub use http::{
    Connector, FetchOrigin, Fetched, HttpClient, HttpConfig, PendingWrite, RemoteBody,
    RemoteMeta, ReqwestConnector, Transport,
};
pub use progress::{DownloadProgress, SilentProgress, StderrProgress};
pub use provider::{
    AliasTable, Frequency, Identity, Payload, RegionAware, RegionCatalog, Source, Units, UrlSpec,
};
pub use schema::{SchemaField, TableSchema};
pub use table::NormalizedTable;
