//! Upload configuration.
//!
//! TOML から読み込む。全フィールドにデフォルトがあるので、空ファイルでも動く。
//!
//! ```toml
//! max_concurrent_uploads = 3
//! base_delay_ms = 1000
//!
//! [platform]
//! endpoint = "https://mp.example.com/cgi-bin/uploadimg2cdn"
//! token = "..."
//! encoding = "form"
//! destination_hosts = ["mmbiz.qpic.cn"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::ClassificationRules;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Knobs for one document-rewrite call. Fixed for the lifetime of a manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_concurrent_uploads: usize,
    pub max_retry_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub min_request_interval_ms: u64,
    pub queue_timeout_ms: u64,
    pub attempt_timeout_ms: u64,
    pub classification: ClassificationRules,
    pub platform: PlatformConfig,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 3,
            max_retry_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            min_request_interval_ms: 500,
            queue_timeout_ms: 120_000,
            attempt_timeout_ms: 30_000,
            classification: ClassificationRules::default(),
            platform: PlatformConfig::default(),
        }
    }
}

impl UploadConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject settings the manager cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_uploads == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_uploads must be at least 1".to_string(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if self.queue_timeout_ms == 0 {
            return Err(ConfigError::Invalid("queue_timeout_ms must be positive".to_string()));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "attempt_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// How the upload request body is encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestEncoding {
    /// `application/x-www-form-urlencoded`
    #[default]
    Form,
    /// `application/json`
    Json,
}

/// Destination platform parameters (endpoint, auth, asset hosts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub endpoint: String,
    pub token: Option<String>,
    pub encoding: RequestEncoding,

    /// Body field carrying the source URL. Defaults per encoding.
    pub source_field: Option<String>,
    pub token_field: String,

    /// Also send the token as `Authorization: Bearer`.
    pub bearer_auth: bool,

    /// Static parameters added to every request body.
    pub extra_params: BTreeMap<String, String>,

    /// Hosts that already serve the platform's own assets.
    pub destination_hosts: Vec<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: None,
            encoding: RequestEncoding::Form,
            source_field: None,
            token_field: "token".to_string(),
            bearer_auth: false,
            extra_params: BTreeMap::new(),
            destination_hosts: Vec::new(),
        }
    }
}

impl PlatformConfig {
    pub fn source_field(&self) -> &str {
        match (&self.source_field, self.encoding) {
            (Some(field), _) => field,
            (None, RequestEncoding::Form) => "imgUrl",
            (None, RequestEncoding::Json) => "imageUrl",
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("platform.endpoint is empty".to_string()));
        }
        reqwest::Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::Invalid(format!("platform.endpoint {:?}: {e}", self.endpoint))
        })?;
        Ok(())
    }
}
