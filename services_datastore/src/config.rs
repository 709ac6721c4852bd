//! Datastore configuration
//!
//! Loaded from `datastore.json` in a directory, or from an explicit path,
//! and validated before use.

use core_types::{CaseAuthTag, Duration, EndpointId, FabricIndex};
use datastore_sync::SyncConfig;
use lifecycle::{RetryPolicy, Timeout};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DATASTORE_CONFIG_NAME: &str = "datastore.json";

pub const CONFIG_FORMAT_VERSION: u32 = 1;

/// Retry schedule as written in the configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff_ms: 1000,
            max_backoff_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    pub format_version: u32,
    /// Endpoint hosting the datastore cluster
    pub datastore_endpoint: EndpointId,
    pub fabric_index: FabricIndex,
    pub apply_timeout_ms: u64,
    pub review_interval_ms: u64,
    pub retry: RetryConfig,
    /// Holders of this CAT (at this version or newer) administer the datastore
    pub administrator_cat: CaseAuthTag,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            format_version: CONFIG_FORMAT_VERSION,
            datastore_endpoint: EndpointId::new(1),
            fabric_index: FabricIndex::new(1),
            apply_timeout_ms: 5000,
            review_interval_ms: 60_000,
            retry: RetryConfig::default(),
            administrator_cat: CaseAuthTag::new(0xFFFD, 1),
        }
    }
}

impl DatastoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.format_version != CONFIG_FORMAT_VERSION {
            return Err(ConfigError::UnsupportedVersion(self.format_version));
        }
        if !self.fabric_index.is_assigned() {
            return Err(ConfigError::Invalid("fabric_index must be non-zero".to_string()));
        }
        if self.apply_timeout_ms == 0 {
            return Err(ConfigError::Invalid("apply_timeout_ms must be non-zero".to_string()));
        }
        if self.review_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "review_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.retry.base_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid(format!(
                "base_backoff_ms {} exceeds max_backoff_ms {}",
                self.retry.base_backoff_ms, self.retry.max_backoff_ms
            )));
        }
        if self.administrator_cat.identifier == 0 || !self.administrator_cat.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "administrator_cat {} must have a non-zero identifier and version",
                self.administrator_cat
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.base_backoff_ms),
            Duration::from_millis(self.retry.max_backoff_ms),
        )
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            retry: self.retry_policy(),
            apply_timeout: Timeout::from_millis(self.apply_timeout_ms),
        }
    }

    pub fn review_interval(&self) -> Duration {
        Duration::from_millis(self.review_interval_ms)
    }
}

/// Errors related to loading or validating configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Configuration not found: {0}")]
    NotFound(String),

    #[error("Failed to read configuration: {0}")]
    Io(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Unsupported configuration format version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Loads datastore configuration from disk
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<DatastoreConfig, ConfigError> {
        let path = PathBuf::from(dir.as_ref()).join(DATASTORE_CONFIG_NAME);
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<DatastoreConfig, ConfigError> {
        let data =
            fs::read_to_string(path.as_ref()).map_err(|err| ConfigError::Io(err.to_string()))?;
        let config: DatastoreConfig =
            serde_json::from_str(&data).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
