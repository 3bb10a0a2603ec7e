//! Grant store collaborator.
//!
//! The engine never owns persistence; it talks to a [`GrantStore`]. Two
//! implementations ship with the crate:
//! - [`MemoryStore`]: in-process maps, for tests and embedders
//! - [`SqliteStore`]: SQLx-backed SQLite with embedded migrations

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::perm::{Effect, RuleKind, SubjectType};
use async_trait::async_trait;
use thiserror::Error;

/// Store errors. Propagated untouched to async callers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("role not found: {0}")]
    RoleNotFound(i64),
    #[error("corrupt row: {0}")]
    CorruptRow(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// A node in the role hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: i64,
    pub name: Option<String>,
    pub parent_id: Option<i64>,
    /// Higher rank is evaluated first.
    pub rank: i64,
    pub updated_at: i64,
}

/// Partial role update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolePatch {
    pub name: Option<Option<String>>,
    pub parent_id: Option<Option<i64>>,
    pub rank: Option<i64>,
}

impl RolePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.parent_id.is_none() && self.rank.is_none()
    }
}

/// One stored rule.
///
/// Unique per `(subject_type, subject_id, ns_key, kind, local)`. Star locals
/// exclude the trailing `.*`; the root wildcard has an empty local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRow {
    pub subject_type: SubjectType,
    /// User id, or the decimal role id for role grants.
    pub subject_id: String,
    pub ns_key: String,
    pub kind: RuleKind,
    pub local: String,
    pub effect: Effect,
    pub updated_at: i64,
}

impl GrantRow {
    /// Role id of a role grant. `None` for user grants or a corrupt id.
    pub fn role_id(&self) -> Option<i64> {
        match self.subject_type {
            SubjectType::Role => self.subject_id.parse().ok(),
            SubjectType::User => None,
        }
    }

    pub fn same_rule(&self, other: &GrantRow) -> bool {
        self.subject_type == other.subject_type
            && self.subject_id == other.subject_id
            && self.ns_key == other.ns_key
            && self.kind == other.kind
            && self.local == other.local
    }
}

/// Persistence operations the engine depends on.
#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError>;

    async fn create_role(
        &self,
        parent_id: Option<i64>,
        rank: i64,
        name: Option<&str>,
    ) -> Result<i64, StoreError>;

    async fn update_role(&self, id: i64, patch: &RolePatch) -> Result<(), StoreError>;

    /// Delete a role along with its grants and user assignments. Its
    /// children move up to its parent. All of it happens atomically.
    async fn delete_role(&self, id: i64) -> Result<(), StoreError>;

    async fn list_user_role_ids(&self, user_id: &str) -> Result<Vec<i64>, StoreError>;

    async fn assign_role_to_user(&self, user_id: &str, role_id: i64) -> Result<(), StoreError>;

    async fn unassign_role_from_user(&self, user_id: &str, role_id: i64)
    -> Result<(), StoreError>;

    async fn list_grants(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
    ) -> Result<Vec<GrantRow>, StoreError>;

    async fn list_role_grants(&self, role_ids: &[i64]) -> Result<Vec<GrantRow>, StoreError>;

    /// Insert or replace the rule identified by the row's unique key.
    async fn upsert_grant(&self, row: &GrantRow) -> Result<(), StoreError>;

    /// Remove the rule identified by the row's unique key. Returns whether a
    /// row existed.
    async fn revoke_grant(&self, row: &GrantRow) -> Result<bool, StoreError>;
}
