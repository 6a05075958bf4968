//! Remote API configuration.
//!
//! Service URLs (including the receipt-validation endpoint) live in a public
//! JSON file. It is fetched once and cached in the key-value store for `ttl`
//! seconds.

use crate::subscription::clock::{Clock, SystemClock};
use crate::subscription::config::{keys, HTTP_TIMEOUT_SECS, REMOTE_CONFIG_URL};
use crate::subscription::storage::KeyValueStore;
use crate::subscription::types::StorageError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Service URLs published by the backend team
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
pub struct ApiConfig {
    #[serde(rename = "base_URL", default)]
    pub base_url: String,
    #[serde(rename = "backupApi", default)]
    pub backup_api: String,
    /// Seconds the config stays valid after it was fetched
    #[serde(default)]
    pub ttl: i64,
    #[serde(rename = "file_extract_URL", default, skip_serializing_if = "Option::is_none")]
    pub file_extract_url: Option<String>,
    #[serde(rename = "generate_pdf_URL", default, skip_serializing_if = "Option::is_none")]
    pub generate_pdf_url: Option<String>,
    #[serde(rename = "generate_docx_URL", default, skip_serializing_if = "Option::is_none")]
    pub generate_docx_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_detector_android_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_detector_ios_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plagiarism_checker_android_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plagiarism_checker_ios_url: Option<String>,
    #[serde(rename = "validate_receipt_URL", default, skip_serializing_if = "Option::is_none")]
    pub validate_receipt_url: Option<String>,
}

impl ApiConfig {
    /// Reject configs missing the fields every screen depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.is_empty() {
            return Err(ConfigError::Invalid("missing base_URL"));
        }
        if self.backup_api.is_empty() {
            return Err(ConfigError::Invalid("missing backupApi"));
        }
        if self.ttl <= 0 {
            return Err(ConfigError::Invalid("missing ttl"));
        }
        Ok(())
    }
}

/// Config as persisted, with the fetch time in epoch millis
#[derive(Serialize, Deserialize, Clone, Debug)]
struct CachedApiConfig {
    config: ApiConfig,
    timestamp: i64,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error! status: {0}")]
    Status(u16),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config structure: {0}")]
    Invalid(&'static str),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// What the subscription manager needs from the remote config
pub trait ApiConfigSource: Send + Sync {
    fn validate_receipt_url(&self) -> Option<String>;

    fn is_loaded(&self) -> bool;
}

/// A config the host already holds
impl ApiConfigSource for ApiConfig {
    fn validate_receipt_url(&self) -> Option<String> {
        self.validate_receipt_url.clone().filter(|url| !url.is_empty())
    }

    fn is_loaded(&self) -> bool {
        true
    }
}

/// TTL-cached remote config stored alongside the subscription state
pub struct ApiConfigService {
    store: Arc<dyn KeyValueStore>,
    client: reqwest::Client,
    url: String,
    clock: Arc<dyn Clock>,
}

impl ApiConfigService {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        ApiConfigService {
            store,
            client,
            url: REMOTE_CONFIG_URL.to_string(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Cache `config` with the current time
    pub fn save(&self, config: &ApiConfig) -> Result<(), StorageError> {
        let cached = CachedApiConfig {
            config: config.clone(),
            timestamp: self.clock.now_millis(),
        };
        let json = serde_json::to_string(&cached)?;
        self.store.set(keys::API_CONFIG, json.into())
    }

    /// Cached config, or `None` when absent, unreadable or past its TTL
    pub fn cached(&self) -> Option<ApiConfig> {
        let raw = self.store.get_string(keys::API_CONFIG)?;

        let cached: CachedApiConfig = match serde_json::from_str(&raw) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::error!(error = %e, "Error reading cached API config");
                return None;
            }
        };

        let elapsed_secs = (self.clock.now_millis() - cached.timestamp) / 1000;
        if elapsed_secs > cached.config.ttl {
            tracing::debug!(elapsed_secs, ttl = cached.config.ttl, "API config cache expired");
            return None;
        }

        Some(cached.config)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(keys::API_CONFIG)
    }

    pub fn is_valid(&self) -> bool {
        self.cached().is_some()
    }

    /// Download and validate the config without touching the cache
    pub async fn fetch_remote(&self) -> Result<ApiConfig, ConfigError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ConfigError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConfigError::Status(status.as_u16()));
        }

        let config: ApiConfig = response
            .json()
            .await
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Cached config if still fresh, otherwise a fresh download (then cached)
    pub async fn load(&self) -> Result<ApiConfig, ConfigError> {
        if let Some(config) = self.cached() {
            tracing::debug!("Using cached API config");
            return Ok(config);
        }

        tracing::info!(url = %self.url, "Fetching API config");
        let config = self.fetch_remote().await?;

        if let Err(e) = self.save(&config) {
            tracing::warn!(error = %e, "Fetched API config could not be cached");
        }

        tracing::info!("API config fetched and cached");
        Ok(config)
    }

    /// Drop the cache and download again
    pub async fn refetch(&self) -> Result<ApiConfig, ConfigError> {
        self.clear()?;
        self.load().await
    }
}

impl ApiConfigSource for ApiConfigService {
    fn validate_receipt_url(&self) -> Option<String> {
        self.cached()?.validate_receipt_url.filter(|url| !url.is_empty())
    }

    fn is_loaded(&self) -> bool {
        self.is_valid()
    }
}
