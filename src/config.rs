//! Client configuration, loadable from TOML.
//!
//! ```
//! use firewx::{FireWxConfig, SourceFamily};
//!
//! let config = FireWxConfig::from_toml_str(r#"
//!     [cascade]
//!     max_lookback = 3
//!
//!     [[sources]]
//!     family = "gridded_analysis"
//!     cadence_hours = 1
//!     endpoints = [
//!         { url_template = "https://mirror.test/{family}/{domain}/{stamp}.json", role = "primary" },
//!     ]
//! "#).unwrap();
//! assert_eq!(config.cascade.max_lookback, 3);
//! assert_eq!(config.cascade.request_timeout_secs, 30);
//! assert_eq!(config.sources[0].family, SourceFamily::GriddedAnalysis);
//! assert!(!config.cache.enabled);
//! ```

use crate::catalog::field_table::{FieldTable, FieldTableEntry};
use crate::catalog::registry::{SourceConfig, SourceRegistry};
use crate::error::FireWxError;
use crate::observations::sync::ObservationPolicy;
use crate::retrieval::cascade::CascadePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CACHE_TTL_SECS: u64 = 600;

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Defaults to a `firewx_cache` folder in the system cache directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            directory: None,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FireWxConfig {
    #[serde(default)]
    pub cascade: CascadePolicy,
    #[serde(default)]
    pub observations: ObservationPolicy,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Layered over the built-in field table.
    #[serde(default)]
    pub fields: Vec<FieldTableEntry>,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl FireWxConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, FireWxError> {
        toml::from_str(text).map_err(|e| FireWxError::ConfigParse(None, e))
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, FireWxError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FireWxError::ConfigRead(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| FireWxError::ConfigParse(Some(path.to_path_buf()), e))
    }

    pub fn field_table(&self) -> FieldTable {
        FieldTable::builtin().with_overrides(&self.fields)
    }

    pub fn registry(&self) -> SourceRegistry {
        SourceRegistry::new(self.sources.clone())
    }
}
