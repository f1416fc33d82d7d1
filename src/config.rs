//! Engine configuration, persisted as TOML.
//!
//! ```toml
//! log_filter = "rulegraph=debug"
//!
//! [trigger]
//! max_passes = 16
//!
//! [repair]
//! enabled = true
//! require_declaration = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleGraphConfig {
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub repair: RepairConfig,
    /// Default tracing filter for the CLI when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

/// Commit trigger settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// How many times the active observer re-reads a growing commit before
    /// giving up.
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,
}

/// Repair tree settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Derive and persist repair trees for inconsistent evaluations.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Only suggest repairs on properties declared repairable.
    #[serde(default)]
    pub require_declaration: bool,
}

fn default_log_filter() -> String {
    "info".into()
}
fn default_max_passes() -> usize {
    16
}
fn default_enabled() -> bool {
    true
}

impl Default for RuleGraphConfig {
    fn default() -> Self {
        Self {
            trigger: TriggerConfig::default(),
            repair: RepairConfig::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            max_passes: default_max_passes(),
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            require_declaration: false,
        }
    }
}

impl RuleGraphConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content).map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })
    }

    fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }
}
