//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use crate::perm::ParsedNode;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("database.path must not be empty")]
    EmptyDatabasePath,
    #[error("engine.{0} must be greater than zero")]
    ZeroCapacity(&'static str),
    #[error("declare[{index}].node is invalid: {reason}")]
    InvalidDeclaration { index: usize, reason: String },
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.database.path.is_empty() {
        errors.push(ValidationError::EmptyDatabasePath);
    }

    if config.engine.resolver_cache_capacity == 0 {
        errors.push(ValidationError::ZeroCapacity("resolver_cache_capacity"));
    }
    if config.engine.user_cache_capacity == 0 {
        errors.push(ValidationError::ZeroCapacity("user_cache_capacity"));
    }
    if config.engine.role_cache_capacity == 0 {
        errors.push(ValidationError::ZeroCapacity("role_cache_capacity"));
    }

    for (index, block) in config.declare.iter().enumerate() {
        if let Err(e) = ParsedNode::parse(&block.node) {
            errors.push(ValidationError::InvalidDeclaration {
                index,
                reason: e.to_string(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
