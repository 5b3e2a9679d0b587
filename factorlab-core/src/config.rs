//! Serializable configuration for downloads, the cache and dataset defaults.
//!
//! Loaded from a TOML file; every field has a default so an empty file (or no
//! file at all) is a valid configuration.

use crate::data::http::HttpConfig;
use crate::data::provider::Frequency;
use crate::error::{DataError, DataResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on followed redirects, regardless of configuration.
pub const MAX_REDIRECTS: usize = 3;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FactorLabConfig {
    pub http: HttpSection,
    pub cache: CacheSection,
    pub dataset: DatasetSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpSection {
    /// Per-request timeout for full downloads.
    pub timeout_secs: u64,
    /// Timeout for the metadata probe issued against stale entries.
    pub probe_timeout_secs: u64,
    pub max_redirects: usize,
    /// Downloads larger than this report byte progress.
    pub progress_threshold_bytes: u64,
    pub user_agent: String,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            probe_timeout_secs: 5,
            max_redirects: MAX_REDIRECTS,
            progress_threshold_bytes: 1_048_576,
            user_agent: concat!("factorlab/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSection {
    /// Cache directory. `None` selects the platform cache directory.
    pub dir: Option<PathBuf>,
    pub default_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            dir: None,
            default_ttl_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatasetSection {
    pub frequency: Frequency,
    /// Drop rows that still hold nulls after a composite join.
    pub drop_nulls: bool,
}

impl Default for DatasetSection {
    fn default() -> Self {
        Self {
            frequency: Frequency::Monthly,
            drop_nulls: true,
        }
    }
}

impl FactorLabConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> DataResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DataError::InvalidParameter(format!("read config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> DataResult<Self> {
        toml::from_str(content)
            .map_err(|e| DataError::InvalidParameter(format!("parse config TOML: {e}")))
    }

    /// Resolved cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache.dir.clone().unwrap_or_else(default_cache_dir)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.default_ttl_secs)
    }

    /// HTTP settings with the redirect bound enforced.
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            timeout: Duration::from_secs(self.http.timeout_secs),
            probe_timeout: Duration::from_secs(self.http.probe_timeout_secs),
            max_redirects: self.http.max_redirects.min(MAX_REDIRECTS),
            progress_threshold_bytes: self.http.progress_threshold_bytes,
            user_agent: self.http.user_agent.clone(),
        }
    }
}

/// `{platform cache dir}/factorlab`, falling back to `./.factorlab-cache`.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("factorlab"))
        .unwrap_or_else(|| PathBuf::from(".factorlab-cache"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = FactorLabConfig::from_toml("").unwrap();
        assert_eq!(config, FactorLabConfig::default());
        assert_eq!(config.default_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.dataset.frequency, Frequency::Monthly);
    }

    #[test]
    fn partial_sections_override_only_given_fields() {
        let config = FactorLabConfig::from_toml(
            r#"
            [http]
            timeout_secs = 30

            [cache]
            dir = "/tmp/factorlab-test"
            default_ttl_secs = 60

            [dataset]
            frequency = "d"
            "#,
        )
        .unwrap();

        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(config.http.probe_timeout_secs, 5);
        assert_eq!(config.cache_dir(), PathBuf::from("/tmp/factorlab-test"));
        assert_eq!(config.default_ttl(), Duration::from_secs(60));
        assert_eq!(config.dataset.frequency, Frequency::Daily);
        assert!(config.dataset.drop_nulls);
    }

    #[test]
    fn redirects_are_clamped() {
        let config = FactorLabConfig::from_toml("[http]\nmax_redirects = 10\n").unwrap();
        assert_eq!(config.http_config().max_redirects, MAX_REDIRECTS);
    }

    #[test]
    fn malformed_toml_is_rejected() {
        let result = FactorLabConfig::from_toml("[http\ntimeout_secs = ");
        assert!(matches!(result, Err(DataError::InvalidParameter(_))));
    }
}
