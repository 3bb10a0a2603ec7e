//! Permission engine tuning.

use serde::Deserialize;
use std::time::Duration;

/// Cache sizes and lifetimes for the permission engine.
///
/// Every field has a serde default, so an empty `[engine]` table (or none at
/// all) yields [`EngineConfig::default`].
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Resolved node references kept in the resolver LRU (default: 4096).
    #[serde(default = "default_resolver_cache_capacity")]
    pub resolver_cache_capacity: usize,
    /// Users whose compiled overrides are kept in memory (default: 10000).
    #[serde(default = "default_user_cache_capacity")]
    pub user_cache_capacity: usize,
    /// Seconds a compiled user override stays valid (default: 300).
    #[serde(default = "default_user_cache_ttl_secs")]
    pub user_cache_ttl_secs: u64,
    /// Users whose role lists are kept in memory (default: 10000).
    #[serde(default = "default_role_cache_capacity")]
    pub role_cache_capacity: usize,
    /// Seconds a user's role list stays valid (default: 300).
    #[serde(default = "default_role_cache_ttl_secs")]
    pub role_cache_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolver_cache_capacity: default_resolver_cache_capacity(),
            user_cache_capacity: default_user_cache_capacity(),
            user_cache_ttl_secs: default_user_cache_ttl_secs(),
            role_cache_capacity: default_role_cache_capacity(),
            role_cache_ttl_secs: default_role_cache_ttl_secs(),
        }
    }
}

impl EngineConfig {
    pub fn user_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.user_cache_ttl_secs)
    }

    pub fn role_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.role_cache_ttl_secs)
    }
}

fn default_resolver_cache_capacity() -> usize {
    4096
}

fn default_user_cache_capacity() -> usize {
    10_000
}

fn default_user_cache_ttl_secs() -> u64 {
    300
}

fn default_role_cache_capacity() -> usize {
    10_000
}

fn default_role_cache_ttl_secs() -> u64 {
    300
}
