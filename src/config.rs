use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::repository::backends::MetadataConfigs;
use crate::storage::backends::BackendConfigs;
use crate::validation::DEFAULT_MAX_UPLOAD_SIZE;

static CONFIG: OnceCell<RuntimeConfig> = OnceCell::new();

pub fn config() -> &'static RuntimeConfig {
    CONFIG.get().expect("config init")
}

pub async fn init(config_file: &Path) -> Result<()> {
    let file = tokio::fs::read(config_file).await?;

    let cfg: RuntimeConfig = if config_file.extension().map(|e| e == "json").unwrap_or(false) {
        serde_json::from_slice(&file)?
    } else {
        serde_yaml::from_slice(&file)?
    };

    let _ = CONFIG.set(cfg);

    Ok(())
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Internal error detail is returned to clients.
    Development,

    /// Internal error detail is only logged.
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Self::Production
    }
}

#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub environment: Environment,

    /// The object store holding the raw image data.
    pub storage: BackendConfigs,

    /// The store holding image records and answering album existence.
    pub metadata: MetadataConfigs,

    #[serde(default = "default_max_upload_size")]
    /// The maximum upload size in bytes.
    ///
    /// Defaults to 5MB.
    pub max_upload_size: usize,

    #[serde(default)]
    /// If set, JPEG and PNG uploads larger than these dimensions are
    /// downscaled to fit before being stored.
    pub max_dimensions: Option<DimensionLimits>,

    #[serde(default = "default_object_store_timeout")]
    /// How long a single object store call may take in seconds before
    /// it is treated as failed.
    pub object_store_timeout_secs: u64,

    #[serde(default = "default_max_concurrency")]
    /// The maximum number of object store deletions in flight during
    /// bulk deletion and reconciliation.
    pub max_concurrency: usize,

    #[serde(default = "default_cache_size")]
    /// The size of the raw image cache in MB, `0` disables it.
    pub cache_size: u64,

    #[serde(default)]
    /// If set, orphaned records are reconciled on this interval.
    pub reconcile_interval_secs: Option<u64>,
}

impl RuntimeConfig {
    #[inline]
    pub fn object_store_timeout(&self) -> Duration {
        Duration::from_secs(self.object_store_timeout_secs)
    }

    #[inline]
    pub fn exposes_internal_errors(&self) -> bool {
        self.environment == Environment::Development
    }
}

#[derive(Debug, Copy, Clone, Deserialize)]
pub struct DimensionLimits {
    pub width: u32,
    pub height: u32,
}

const fn default_max_upload_size() -> usize {
    DEFAULT_MAX_UPLOAD_SIZE
}

const fn default_object_store_timeout() -> u64 {
    30
}

const fn default_max_concurrency() -> usize {
    16
}

const fn default_cache_size() -> u64 {
    32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_applied() {
        let cfg: RuntimeConfig = serde_yaml::from_str(
            "storage: memory\nmetadata:\n  memory: {}\n",
        )
        .unwrap();

        assert_eq!(cfg.environment, Environment::Production);
        assert_eq!(cfg.max_upload_size, 5 * 1024 * 1024);
        assert_eq!(cfg.object_store_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.max_concurrency, 16);
        assert!(cfg.max_dimensions.is_none());
        assert!(!cfg.exposes_internal_errors());
    }
}
