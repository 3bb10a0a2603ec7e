//! Core configuration types and loading.

use super::engine::EngineConfig;
use crate::perm::Effect;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration for the `capgate` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Grant store location.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Engine cache tuning.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Capability declarations applied at startup.
    #[serde(default)]
    pub declare: Vec<DeclareBlock>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file, or `:memory:`.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "capgate.db".to_string()
}

/// One `[[declare]]` block: a node string and its default effect.
#[derive(Debug, Clone, Deserialize)]
pub struct DeclareBlock {
    /// Full node string, e.g. `shop.buy` or `shop.admin.*`.
    pub node: String,
    #[serde(default = "default_effect")]
    pub default: Effect,
    pub description: Option<String>,
}

fn default_effect() -> Effect {
    Effect::Deny
}
