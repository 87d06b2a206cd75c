use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ErrorCode;

/// Tunables for one replica's insertion path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Most atoms the pending buffer may hold; `0` removes the bound.
    #[serde(default = "default_pending_limit")]
    pub pending_limit: usize,
    /// Priority given to atoms created locally without an explicit one.
    #[serde(default)]
    pub default_priority: i32,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            pending_limit: default_pending_limit(),
            default_priority: 0,
        }
    }
}

impl ReplicaConfig {
    /// Config with no pending-buffer bound.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            pending_limit: 0,
            ..Self::default()
        }
    }

    /// The pending-buffer bound, or `None` when unbounded.
    #[must_use]
    pub const fn pending_bound(&self) -> Option<usize> {
        match self.pending_limit {
            0 => None,
            limit => Some(limit),
        }
    }
}

const fn default_pending_limit() -> usize {
    10_000
}

/// Load a replica config from a TOML file, falling back to defaults when the
/// file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_replica_config(path: &Path) -> Result<ReplicaConfig> {
    if !path.exists() {
        return Ok(ReplicaConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    parse_replica_config(&content).with_context(|| {
        format!(
            "Failed to parse {} ({})",
            path.display(),
            ErrorCode::ConfigParseError
        )
    })
}

/// Parse a replica config from TOML text.
///
/// # Errors
///
/// Returns an error if the text is not valid TOML for [`ReplicaConfig`].
pub fn parse_replica_config(content: &str) -> Result<ReplicaConfig> {
    let config = toml::from_str::<ReplicaConfig>(content)?;
    Ok(config)
}
