//! Revalidating HTTP client backed by the on-disk cache.
//!
//! The client only works inside an opened session. For every URL it decides
//! between reusing cached bytes and paying for a full download:
//!
//! 1. fresh cache entry: return it, no network traffic
//! 2. stale entry: HEAD probe; matching ETag or Last-Modified refreshes the
//!    expiry and returns the cached bytes without a GET
//! 3. anything else (mismatch, probe failure, no validators): full GET
//!
//! Cache writes are staged as a [`PendingWrite`] so callers can defer them
//! until the downloaded bytes have been parsed and validated.

use crate::config::MAX_REDIRECTS;
use crate::data::cache::{cache_key, now_epoch, CacheStore, Validators};
use crate::data::progress::DownloadProgress;
use crate::error::{DataError, DataResult};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Body read size for streamed downloads.
pub const CHUNK_SIZE: usize = 128 * 1024;

/// Connection settings for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub probe_timeout: Duration,
    pub max_redirects: usize,
    pub progress_threshold_bytes: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(5),
            max_redirects: MAX_REDIRECTS,
            progress_threshold_bytes: 1_048_576,
            user_agent: concat!("factorlab/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Response headers relevant to caching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteMeta {
    pub validators: Validators,
    pub content_length: Option<u64>,
}

/// A successful GET whose body has not been read yet.
pub struct RemoteBody {
    pub meta: RemoteMeta,
    pub reader: Box<dyn Read + Send>,
}

/// One open connection pool. Implementations must map non-2xx statuses to
/// `RemoteRejected` and transport failures to `Network`.
pub trait Transport: Send + Sync {
    /// Metadata-only request (HEAD).
    fn probe(&self, url: &str) -> DataResult<RemoteMeta>;

    fn fetch(&self, url: &str) -> DataResult<RemoteBody>;
}

/// Opens sessions. Swapped out in tests for a scripted transport.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &HttpConfig) -> DataResult<Box<dyn Transport>>;
}

/// TLS-verified blocking reqwest client.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReqwestConnector;

impl Connector for ReqwestConnector {
    fn connect(&self, config: &HttpConfig) -> DataResult<Box<dyn Transport>> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(
                config.max_redirects.min(MAX_REDIRECTS),
            ))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| DataError::Network {
                url: String::from("<session>"),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Box::new(ReqwestTransport {
            client,
            probe_timeout: config.probe_timeout,
        }))
    }
}

struct ReqwestTransport {
    client: reqwest::blocking::Client,
    probe_timeout: Duration,
}

impl ReqwestTransport {
    fn checked(
        url: &str,
        result: reqwest::Result<reqwest::blocking::Response>,
    ) -> DataResult<reqwest::blocking::Response> {
        let resp = result.map_err(|e| DataError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !resp.status().is_success() {
            return Err(DataError::RemoteRejected {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(resp)
    }

    fn meta(resp: &reqwest::blocking::Response) -> RemoteMeta {
        let header = |name: reqwest::header::HeaderName| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        RemoteMeta {
            validators: Validators {
                etag: header(reqwest::header::ETAG),
                last_modified: header(reqwest::header::LAST_MODIFIED),
            },
            content_length: resp.content_length(),
        }
    }
}

impl Transport for ReqwestTransport {
    fn probe(&self, url: &str) -> DataResult<RemoteMeta> {
        let resp = Self::checked(
            url,
            self.client.head(url).timeout(self.probe_timeout).send(),
        )?;
        Ok(Self::meta(&resp))
    }

    fn fetch(&self, url: &str) -> DataResult<RemoteBody> {
        let resp = Self::checked(url, self.client.get(url).send())?;
        Ok(RemoteBody {
            meta: Self::meta(&resp),
            reader: Box::new(resp),
        })
    }
}

/// How a fetch was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    /// Unexpired cache entry; no request was made.
    Fresh,
    /// Stale entry confirmed unchanged by a probe.
    Revalidated,
    /// Full GET.
    Downloaded,
}

/// A cache mutation produced by a fetch, applied with [`HttpClient::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite {
    Store {
        key: String,
        url: String,
        payload: Vec<u8>,
        validators: Validators,
        ttl: Duration,
    },
    Refresh {
        key: String,
        ttl: Duration,
    },
}

/// Bytes for one URL plus the cache write that would record them.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub origin: FetchOrigin,
    pub pending: Option<PendingWrite>,
}

/// Session-scoped, cache-aware HTTP client.
pub struct HttpClient {
    config: HttpConfig,
    cache: CacheStore,
    connector: Arc<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    progress: Option<Arc<dyn DownloadProgress>>,
}

impl HttpClient {
    pub fn new(config: HttpConfig, cache: CacheStore) -> Self {
        Self::with_connector(config, cache, Arc::new(ReqwestConnector))
    }

    pub fn with_connector(
        config: HttpConfig,
        cache: CacheStore,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            cache,
            connector,
            transport: None,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn DownloadProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Whether a progress sink is attached.
    pub fn reports_progress(&self) -> bool {
        self.progress.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Open a session. Opening an already open client is a no-op.
    pub fn open(&mut self) -> DataResult<()> {
        if self.transport.is_none() {
            self.transport = Some(self.connector.connect(&self.config)?);
            debug!(timeout_secs = self.config.timeout.as_secs(), "http session opened");
        }
        Ok(())
    }

    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            debug!("http session closed");
        }
    }

    /// Run `f` inside a session, opening one if needed.
    ///
    /// A session opened here is closed afterwards, even when `f` fails; a
    /// session that was already open is left open for its owner.
    pub fn session<T>(&mut self, f: impl FnOnce(&HttpClient) -> DataResult<T>) -> DataResult<T> {
        let opened_here = !self.is_open();
        self.open()?;
        let result = f(self);
        if opened_here {
            self.close();
        }
        result
    }

    fn transport(&self, url: &str) -> DataResult<&dyn Transport> {
        self.transport.as_deref().ok_or_else(|| {
            DataError::Usage(format!(
                "download of {url} attempted outside an open session"
            ))
        })
    }

    /// Resolve `url` to bytes without touching the cache store.
    pub fn fetch(&self, url: &str, ttl: Duration) -> DataResult<Fetched> {
        self.fetch_inner(url, ttl, None)
    }

    /// Like [`fetch`](Self::fetch), always reporting byte progress on a GET.
    pub fn fetch_streaming(&self, url: &str, ttl: Duration, label: &str) -> DataResult<Fetched> {
        self.fetch_inner(url, ttl, Some(label))
    }

    fn fetch_inner(&self, url: &str, ttl: Duration, stream_label: Option<&str>) -> DataResult<Fetched> {
        let transport = self.transport(url)?;
        let key = cache_key(url);

        if let Some(entry) = self.cache.get(&key) {
            let now = now_epoch();
            if entry.meta.is_fresh(now) {
                debug!(url, remaining_secs = entry.meta.expires_at - now, "cache hit");
                return Ok(Fetched {
                    bytes: entry.payload,
                    origin: FetchOrigin::Fresh,
                    pending: None,
                });
            }

            debug!(url, "cache stale, probing server");
            match transport.probe(url) {
                Ok(remote) if entry.meta.validators.matches(&remote.validators) => {
                    debug!(url, "validators match, reusing cached body");
                    return Ok(Fetched {
                        bytes: entry.payload,
                        origin: FetchOrigin::Revalidated,
                        pending: Some(PendingWrite::Refresh { key, ttl }),
                    });
                }
                Ok(_) => debug!(url, "metadata mismatch or unavailable"),
                Err(e) => debug!(url, "probe failed: {e}"),
            }
        }

        let body = transport.fetch(url)?;
        let total = body.meta.content_length;
        let report = stream_label.is_some()
            || total.is_some_and(|len| len > self.config.progress_threshold_bytes);
        let label = stream_label.unwrap_or(url);
        let bytes = self.read_body(url, body.reader, total, report.then_some(label))?;

        info!(url, bytes = bytes.len(), "downloaded");
        Ok(Fetched {
            pending: Some(PendingWrite::Store {
                key,
                url: url.to_string(),
                payload: bytes.clone(),
                validators: body.meta.validators,
                ttl,
            }),
            bytes,
            origin: FetchOrigin::Downloaded,
        })
    }

    fn read_body(
        &self,
        url: &str,
        mut reader: Box<dyn Read + Send>,
        total: Option<u64>,
        progress_label: Option<&str>,
    ) -> DataResult<Vec<u8>> {
        let progress = progress_label.and_then(|label| Some((label, self.progress.as_deref()?)));
        let mut bytes = Vec::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);
        let mut chunk = vec![0u8; CHUNK_SIZE];

        if let Some((label, sink)) = progress {
            sink.on_start(label, total);
        }
        loop {
            let n = reader.read(&mut chunk).map_err(|e| DataError::Network {
                url: url.to_string(),
                reason: format!("reading response body: {e}"),
            })?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..n]);
            if let Some((label, sink)) = progress {
                sink.on_bytes(label, bytes.len() as u64, total);
            }
        }
        if let Some((label, sink)) = progress {
            sink.on_finish(label, bytes.len() as u64);
        }
        Ok(bytes)
    }

    /// Apply a staged cache write. Failures are logged, never returned.
    pub fn commit(&self, pending: PendingWrite) {
        match pending {
            PendingWrite::Store {
                key,
                url,
                payload,
                validators,
                ttl,
            } => self
                .cache
                .set_with_url(&key, Some(&url), &payload, &validators, ttl),
            PendingWrite::Refresh { key, ttl } => self.cache.touch(&key, ttl),
        }
    }

    /// Fetch and commit in one step.
    pub fn download(&self, url: &str, ttl: Duration) -> DataResult<Vec<u8>> {
        let fetched = self.fetch(url, ttl)?;
        if let Some(pending) = fetched.pending {
            self.commit(pending);
        }
        Ok(fetched.bytes)
    }

    /// Streaming variant of [`download`](Self::download): same algorithm, byte
    /// progress reported during the body transfer.
    pub fn download_streaming(&self, url: &str, ttl: Duration, label: &str) -> DataResult<Vec<u8>> {
        let fetched = self.fetch_streaming(url, ttl, label)?;
        if let Some(pending) = fetched.pending {
            self.commit(pending);
        }
        Ok(fetched.bytes)
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("open", &self.is_open())
            .finish()
    }
}
