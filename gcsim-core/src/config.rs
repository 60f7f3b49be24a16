//! Simulator configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{GcSimError, GcSimResult};

/// Environment variable overriding [`SimulatorConfig::young_gen_threshold`]
pub const ENV_YOUNG_GEN_THRESHOLD: &str = "GCSIM_YOUNG_GEN_THRESHOLD";
/// Environment variable overriding [`SimulatorConfig::max_heap_size_kb`]
pub const ENV_MAX_HEAP_SIZE_KB: &str = "GCSIM_MAX_HEAP_SIZE_KB";
/// Environment variable overriding [`SimulatorConfig::database_path`]
pub const ENV_DATABASE: &str = "GCSIM_DATABASE";

/// Heap simulator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Promotion age: a young object whose age reaches this value moves to the old generation
    pub young_gen_threshold: u32,

    /// Nominal heap capacity (KB), used for heap utilization reporting
    pub max_heap_size_kb: u64,

    /// SQLite database file used by the command-line front end
    pub database_path: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            young_gen_threshold: 10,
            max_heap_size_kb: 1024 * 1024, // 1GB
            database_path: "gcsim.db".to_string(),
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from a TOML file, or JSON when the extension is `.json`
    pub fn from_file(path: &Path) -> GcSimResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply `GCSIM_*` environment overrides
    pub fn apply_env_overrides(mut self) -> GcSimResult<Self> {
        if let Ok(value) = std::env::var(ENV_YOUNG_GEN_THRESHOLD) {
            self.young_gen_threshold = value.trim().parse().map_err(|_| {
                GcSimError::config(format!("{ENV_YOUNG_GEN_THRESHOLD}: `{value}` is not a number"))
            })?;
        }
        if let Ok(value) = std::env::var(ENV_MAX_HEAP_SIZE_KB) {
            self.max_heap_size_kb = value.trim().parse().map_err(|_| {
                GcSimError::config(format!("{ENV_MAX_HEAP_SIZE_KB}: `{value}` is not a number"))
            })?;
        }
        if let Ok(value) = std::env::var(ENV_DATABASE) {
            self.database_path = value;
        }
        self.validate()?;
        Ok(self)
    }

    /// Builder-style override of the promotion threshold
    pub fn with_young_gen_threshold(mut self, threshold: u32) -> Self {
        self.young_gen_threshold = threshold;
        self
    }

    /// Reject values the simulator cannot work with
    pub fn validate(&self) -> GcSimResult<()> {
        if self.young_gen_threshold == 0 {
            return Err(GcSimError::config("young_gen_threshold must be at least 1"));
        }
        if self.max_heap_size_kb == 0 {
            return Err(GcSimError::config("max_heap_size_kb must be at least 1"));
        }
        Ok(())
    }
}
