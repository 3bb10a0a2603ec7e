//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Top-level config struct, database and declaration blocks
//! - [`engine`]: Cache sizing and TTLs for the permission engine (EngineConfig)
//! - [`validation`]: Startup checks that collect every problem at once

mod engine;
mod types;
pub mod validation;

pub use engine::EngineConfig;
pub use types::{Config, ConfigError, DatabaseConfig, DeclareBlock};
