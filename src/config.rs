//! Engine configuration loaded from TOML or built programmatically.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::StorageOptions;
use crate::types::{PenumbraError, Result};

/// Settings shared by the optimizer, mapper and executor.
///
/// ```toml
/// num_threads = 4
/// count_fast_path = true
/// query_timeout_ms = 30000
///
/// [storage]
/// node_group_capacity = 131072
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads used for parallel pipelines.
    pub num_threads: usize,
    /// Whether the count-over-relationship fusion pass runs.
    pub enable_count_rel_table: bool,
    /// Whether the order-by pushdown pass runs.
    pub enable_order_by_push_down: bool,
    /// Whether a fused count may use per-table row totals instead of scanning.
    pub count_fast_path: bool,
    /// Whether schemas are computed flat (one row per group) or factorized.
    pub flat_schema: bool,
    /// Optional per-query deadline in milliseconds.
    pub query_timeout_ms: Option<u64>,
    /// Storage-level options.
    pub storage: StorageOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageOptions::default(),
            num_threads: 1,
            enable_count_rel_table: true,
            enable_order_by_push_down: true,
            count_fast_path: true,
            flat_schema: false,
            query_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|err| PenumbraError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| PenumbraError::Config(err.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(PenumbraError::Config("num_threads must be at least 1".into()));
        }
        if self.storage.node_group_capacity == 0 {
            return Err(PenumbraError::Config(
                "storage.node_group_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Query deadline as a duration.
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    /// Sets the storage options.
    pub fn storage(mut self, storage: StorageOptions) -> Self {
        self.storage = storage;
        self
    }

    /// Sets the number of worker threads.
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads.max(1);
        self
    }

    /// Enables or disables the count-over-relationship fusion pass.
    pub fn enable_count_rel_table(mut self, enabled: bool) -> Self {
        self.enable_count_rel_table = enabled;
        self
    }

    /// Enables or disables the order-by pushdown pass.
    pub fn enable_order_by_push_down(mut self, enabled: bool) -> Self {
        self.enable_order_by_push_down = enabled;
        self
    }

    /// Enables or disables the aggregate fast path of fused counts.
    pub fn count_fast_path(mut self, enabled: bool) -> Self {
        self.count_fast_path = enabled;
        self
    }

    /// Selects flat or factorized schemas.
    pub fn flat_schema(mut self, flat: bool) -> Self {
        self.flat_schema = flat;
        self
    }

    /// Sets the per-query deadline.
    pub fn query_timeout_ms(mut self, ms: Option<u64>) -> Self {
        self.query_timeout_ms = ms;
        self
    }
}
