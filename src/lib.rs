//! capgate - capability-node permission engine.
//!
//! Decides whether a user may use a dotted capability node such as
//! `shop.admin.refund`, layering per-user overrides over a ranked role
//! hierarchy over per-namespace declaration defaults.

pub mod config;
pub mod error;
pub mod perm;
pub mod service;
pub mod store;
pub mod telemetry;

pub use error::{PermError, PermResult};
pub use perm::{AuthUser, Decision, DeclareOptions, Effect, NodeRef, RuleKind, SubjectType, Trace};
pub use service::PermissionService;
pub use store::{GrantRow, GrantStore, MemoryStore, Role, RolePatch, SqliteStore, StoreError};
