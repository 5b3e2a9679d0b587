//! Filesystem-backed download cache keyed by URL hash.
//!
//! Layout: `{root}/{key[0..2]}/{key}.bin` (payload) and `{key}.json` (sidecar)
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place), last writer wins
//! - Lazy expiry: freshness is decided by the reader, nothing is swept
//! - Integrity check on load (size + blake3 hash); malformed entries read as absent
//! - Write failures are logged and never reach the caller

use crate::error::{DataError, DataResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Server-provided validators used for client-side revalidation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }

    /// True when either validator is present on both sides and equal.
    pub fn matches(&self, remote: &Validators) -> bool {
        let same = |a: &Option<String>, b: &Option<String>| matches!((a, b), (Some(x), Some(y)) if x == y);
        same(&self.etag, &remote.etag) || same(&self.last_modified, &remote.last_modified)
    }
}

/// Metadata sidecar for a cached payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub url: Option<String>,
    #[serde(flatten)]
    pub validators: Validators,
    /// Epoch seconds after which the entry must be revalidated.
    pub expires_at: i64,
    pub stored_at: i64,
    pub size: u64,
    pub data_hash: String,
}

impl CacheMeta {
    pub fn is_fresh(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

/// A payload together with its metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<u8>,
    pub meta: CacheMeta,
}

/// Lowercase hex SHA-256 of the canonical form of `url`.
pub fn cache_key(url: &str) -> String {
    let canonical = canonical_url(url);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Parsed and re-serialized URL; unparsable input is only trimmed.
pub fn canonical_url(url: &str) -> String {
    let trimmed = url.trim();
    reqwest::Url::parse(trimmed)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| trimmed.to_string())
}

pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

fn expiry_from(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
}

/// The on-disk cache store.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard_dir(&self, key: &str) -> PathBuf {
        let shard = key.get(..2).unwrap_or("__");
        self.root.join(shard)
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        self.shard_dir(key).join(format!("{key}.bin"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.shard_dir(key).join(format!("{key}.json"))
    }

    /// Look up an entry. Missing or malformed entries are `None`.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let meta = self.read_meta(key)?;
        let payload = match fs::read(self.payload_path(key)) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(key = short(key), "cache payload unreadable: {e}");
                return None;
            }
        };

        if payload.len() as u64 != meta.size
            || blake3::hash(&payload).to_hex().as_str() != meta.data_hash
        {
            warn!(key = short(key), "cache entry failed integrity check, ignoring");
            return None;
        }

        debug!(key = short(key), expires_at = meta.expires_at, "cache entry loaded");
        Some(CacheEntry {
            key: key.to_string(),
            payload,
            meta,
        })
    }

    /// Metadata only, without reading the payload.
    pub fn read_meta(&self, key: &str) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(key)).ok()?;
        match serde_json::from_str(&content) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(key = short(key), "malformed cache metadata: {e}");
                None
            }
        }
    }

    /// Store a payload, replacing any previous entry for `key`.
    ///
    /// Failures are logged; the next `get` simply misses.
    pub fn set(&self, key: &str, payload: &[u8], validators: &Validators, ttl: Duration) {
        self.set_with_url(key, None, payload, validators, ttl);
    }

    pub fn set_with_url(
        &self,
        key: &str,
        url: Option<&str>,
        payload: &[u8],
        validators: &Validators,
        ttl: Duration,
    ) {
        if let Err(e) = self.try_set(key, url, payload, validators, ttl) {
            warn!(key = short(key), "cache write skipped: {e}");
        }
    }

    /// Fallible store, for callers that want to see `CacheUnavailable`.
    pub fn try_set(
        &self,
        key: &str,
        url: Option<&str>,
        payload: &[u8],
        validators: &Validators,
        ttl: Duration,
    ) -> DataResult<()> {
        let now = now_epoch();
        let meta = CacheMeta {
            url: url.map(str::to_string),
            validators: validators.clone(),
            expires_at: expiry_from(now, ttl),
            stored_at: now,
            size: payload.len() as u64,
            data_hash: blake3::hash(payload).to_hex().to_string(),
        };

        let dir = self.shard_dir(key);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::CacheUnavailable(format!("create {}: {e}", dir.display())))?;

        write_atomic(&self.payload_path(key), payload)?;
        self.write_meta(key, &meta)?;

        debug!(
            key = short(key),
            bytes = payload.len(),
            ttl_secs = ttl.as_secs(),
            "cache entry stored"
        );
        Ok(())
    }

    /// Push an entry's expiry forward without touching its payload.
    pub fn touch(&self, key: &str, ttl: Duration) {
        let Some(mut meta) = self.read_meta(key) else {
            debug!(key = short(key), "touch on missing entry ignored");
            return;
        };
        meta.expires_at = expiry_from(now_epoch(), ttl);
        if let Err(e) = self.write_meta(key, &meta) {
            warn!(key = short(key), "cache expiry refresh skipped: {e}");
        }
    }

    fn write_meta(&self, key: &str, meta: &CacheMeta) -> DataResult<()> {
        let json = serde_json::to_vec_pretty(meta)
            .map_err(|e| DataError::CacheUnavailable(format!("meta serialization: {e}")))?;
        write_atomic(&self.meta_path(key), &json)
    }

    /// Remove one entry. Returns whether anything was removed.
    pub fn remove(&self, key: &str) -> bool {
        let removed_meta = fs::remove_file(self.meta_path(key)).is_ok();
        let removed_payload = fs::remove_file(self.payload_path(key)).is_ok();
        if removed_meta || removed_payload {
            info!(key = short(key), "cache entry removed");
            true
        } else {
            debug!(key = short(key), "cache entry not found");
            false
        }
    }

    /// Remove every entry. Returns the number of entries removed.
    ///
    /// Only shard directories and `{key}.bin` / `{key}.json` / tmp files are
    /// touched; anything else under the root is left in place, and the root
    /// itself is removed only once empty.
    pub fn clear(&self) -> DataResult<usize> {
        let Ok(shards) = fs::read_dir(&self.root) else {
            return Ok(0);
        };
        let mut removed = HashSet::new();
        for shard in shards.flatten() {
            let shard_path = shard.path();
            let is_shard = shard
                .file_name()
                .to_str()
                .is_some_and(|n| n.len() == 2 && n.bytes().all(|b| b.is_ascii_hexdigit()));
            if !is_shard || !shard_path.is_dir() {
                continue;
            }
            let files = fs::read_dir(&shard_path).map_err(|e| clear_failed(&shard_path, e))?;
            for file in files.flatten() {
                let path = file.path();
                let Some(key) = owned_key(&path) else {
                    continue;
                };
                fs::remove_file(&path).map_err(|e| clear_failed(&path, e))?;
                removed.insert(key);
            }
            // fails while foreign files remain
            let _ = fs::remove_dir(&shard_path);
        }
        let _ = fs::remove_dir(&self.root);

        info!(dir = %self.root.display(), entries = removed.len(), "cache cleared");
        Ok(removed.len())
    }

    /// All readable metadata sidecars, keyed by cache key.
    pub fn entries(&self) -> Vec<(String, CacheMeta)> {
        let mut out = Vec::new();
        let Ok(shards) = fs::read_dir(&self.root) else {
            return out;
        };
        for shard in shards.flatten() {
            let Ok(files) = fs::read_dir(shard.path()) else {
                continue;
            };
            for file in files.flatten() {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if let Some(meta) = self.read_meta(key) {
                    out.push((key.to_string(), meta));
                }
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> DataResult<()> {
    let tmp = path.with_extension(format!("tmp{}", std::process::id()));
    fs::write(&tmp, bytes)
        .map_err(|e| DataError::CacheUnavailable(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        DataError::CacheUnavailable(format!("atomic rename failed: {e}"))
    })
}

fn clear_failed(path: &Path, e: std::io::Error) -> DataError {
    DataError::CacheUnavailable(format!("clear {}: {e}", path.display()))
}

/// Cache key of a file this store writes: `{key}.bin`, `{key}.json` or a
/// `{key}.tmp{pid}` left by an interrupted write.
fn owned_key(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let (key, ext) = name.split_once('.')?;
    let is_key = key.len() == 64 && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    let shard = path.parent()?.file_name()?.to_str()?;
    let owned_ext = matches!(ext, "bin" | "json")
        || ext.strip_prefix("tmp").is_some_and(|pid| pid.bytes().all(|b| b.is_ascii_digit()));
    (is_key && key.starts_with(shard) && owned_ext).then(|| key.to_string())
}

fn short(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validators(etag: &str) -> Validators {
        Validators {
            etag: Some(etag.into()),
            last_modified: Some("Wed, 01 Jan 2025 00:00:00 GMT".into()),
        }
    }

    #[test]
    fn key_is_lowercase_sha256_hex() {
        let key = cache_key("https://example.org/data.csv");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // whitespace and re-serialization do not change the key
        assert_eq!(key, cache_key("  https://example.org/data.csv "));
        assert_ne!(key, cache_key("https://example.org/other.csv"));
    }

    #[test]
    fn set_then_get_roundtrips_payload_and_validators() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let key = cache_key("https://example.org/a.zip");

        store.set(&key, b"payload", &validators("\"v1\""), Duration::from_secs(60));
        let entry = store.get(&key).unwrap();

        assert_eq!(entry.payload, b"payload");
        assert_eq!(entry.meta.validators.etag.as_deref(), Some("\"v1\""));
        assert!(entry.meta.is_fresh(now_epoch()));
    }

    #[test]
    fn zero_ttl_entry_is_stale_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let key = cache_key("https://example.org/b.zip");

        store.set(&key, b"x", &Validators::default(), Duration::ZERO);
        let entry = store.get(&key).unwrap();
        assert!(!entry.meta.is_fresh(now_epoch()));
    }

    #[test]
    fn missing_and_corrupt_entries_read_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let key = cache_key("https://example.org/c.zip");

        assert!(store.get(&key).is_none());

        store.set(&key, b"original", &Validators::default(), Duration::from_secs(60));
        fs::write(store.payload_path(&key), b"tampered").unwrap();
        assert!(store.get(&key).is_none());

        fs::write(store.meta_path(&key), b"{not json").unwrap();
        assert!(store.get(&key).is_none());
    }

    #[test]
    fn touch_refreshes_expiry_without_rewriting_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let key = cache_key("https://example.org/d.zip");

        store.set(&key, b"body", &validators("e"), Duration::ZERO);
        let before = fs::metadata(store.payload_path(&key)).unwrap().modified().unwrap();

        store.touch(&key, Duration::from_secs(3600));

        let entry = store.get(&key).unwrap();
        assert!(entry.meta.is_fresh(now_epoch()));
        let after = fs::metadata(store.payload_path(&key)).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache"));
        let a = cache_key("https://example.org/1");
        let b = cache_key("https://example.org/2");

        store.set(&a, b"1", &Validators::default(), Duration::from_secs(60));
        store.set(&b, b"2", &Validators::default(), Duration::from_secs(60));
        assert_eq!(store.entries().len(), 2);

        assert!(store.remove(&a));
        assert!(!store.remove(&a));
        assert!(store.get(&a).is_none());

        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.get(&b).is_none());
        assert_eq!(store.clear().unwrap(), 0);
    }

    #[test]
    fn clear_leaves_files_it_did_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let key = cache_key("https://example.org/f.zip");
        store.set(&key, b"body", &Validators::default(), Duration::from_secs(60));

        let notes = dir.path().join("notes.txt");
        fs::write(&notes, b"keep me").unwrap();
        let stray = store.shard_dir(&key).join("readme.md");
        fs::write(&stray, b"keep me too").unwrap();
        let leftover = store.payload_path(&key).with_extension("tmp4242");
        fs::write(&leftover, b"partial").unwrap();

        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.get(&key).is_none());
        assert!(!leftover.exists());
        assert_eq!(fs::read(&notes).unwrap(), b"keep me");
        assert_eq!(fs::read(&stray).unwrap(), b"keep me too");
        assert!(dir.path().exists());
    }

    #[test]
    fn unwritable_root_degrades_to_miss() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"not a dir").unwrap();
        let store = CacheStore::new(&blocker);
        let key = cache_key("https://example.org/e");

        let err = store
            .try_set(&key, None, b"x", &Validators::default(), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, DataError::CacheUnavailable(_)));

        // the infallible form only logs
        store.set(&key, b"x", &Validators::default(), Duration::from_secs(1));
        assert!(store.get(&key).is_none());
    }

    #[test]
    fn validators_match_on_either_header() {
        let stored = validators("\"abc\"");
        let same_etag = Validators {
            etag: Some("\"abc\"".into()),
            last_modified: None,
        };
        let same_date = Validators {
            etag: Some("\"other\"".into()),
            last_modified: stored.last_modified.clone(),
        };
        assert!(stored.matches(&same_etag));
        assert!(stored.matches(&same_date));
        assert!(!stored.matches(&Validators::default()));
        assert!(!Validators::default().matches(&Validators::default()));
    }
}
