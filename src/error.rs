//! Unified error handling for capgate.
//!
//! Write APIs (declare, grant, revoke, role edits) report caller misuse and
//! invariant violations through [`PermError`]. Authorization never does:
//! anything it cannot resolve becomes a `Deny`.

use crate::store::StoreError;
use thiserror::Error;

// ============================================================================
// Permission Errors (write path)
// ============================================================================

/// Errors raised synchronously by permission write APIs.
#[derive(Debug, Error)]
pub enum PermError {
    #[error("namespace key is empty")]
    EmptyNamespace,

    #[error("empty segment in node: {0}")]
    EmptySegment(String),

    #[error("illegal wildcard in node: {0}")]
    IllegalWildcard(String),

    #[error("node has no local part: {0}")]
    MissingLocal(String),

    #[error("unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("node is not declared: {0}")]
    Undeclared(String),

    /// The DEFAULT role cannot be deleted or re-parented.
    #[error("the default role is protected")]
    ProtectedRole,

    #[error("role not found: {0}")]
    RoleNotFound(i64),

    #[error("invalid role subject id: {0}")]
    InvalidSubject(String),

    #[error("role {role} cannot inherit from {parent}: cycle")]
    RoleCycle { role: i64, parent: i64 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl PermError {
    /// Get a static error code string for logs and callers that map errors.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyNamespace => "empty_namespace",
            Self::EmptySegment(_) => "empty_segment",
            Self::IllegalWildcard(_) => "illegal_wildcard",
            Self::MissingLocal(_) => "missing_local",
            Self::UnknownNamespace(_) => "unknown_namespace",
            Self::Undeclared(_) => "undeclared",
            Self::ProtectedRole => "protected_role",
            Self::RoleNotFound(_) => "role_not_found",
            Self::InvalidSubject(_) => "invalid_subject",
            Self::RoleCycle { .. } => "role_cycle",
            Self::Store(_) => "store_error",
        }
    }

    /// True for errors caused by a malformed node string.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyNamespace
                | Self::EmptySegment(_)
                | Self::IllegalWildcard(_)
                | Self::MissingLocal(_)
        )
    }
}

/// Result type for permission write APIs.
pub type PermResult<T> = Result<T, PermError>;
