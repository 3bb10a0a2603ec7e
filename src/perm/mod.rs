//! Capability-node permission engine.
//!
//! Answers "may this user use `ns.some.node`?" on the per-message hot path.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                          Permission Engine                         │
//! ├───────────┬────────────┬────────────┬─────────────┬────────────────┤
//! │ Registry  │  Resolver  │  RoleTree  │  Overrides  │     Engine     │
//! │ Interner  │ node -> ref│ inherited  │ per-user    │ user -> roles  │
//! │ Builder   │ LRU cached │ programs   │ TTL + LRU   │ -> declaration │
//! │ Program   │ epoch check│ rank order │ negative    │ -> Deny        │
//! └───────────┴────────────┴────────────┴─────────────┴────────────────┘
//! ```
//!
//! Every rule set (a namespace's declarations, a role's inherited grants, a
//! user's own grants) is compiled into an immutable [`Program`]. Evaluation
//! walks the layers in fixed order and stops at the first non-`Unset` answer.

pub mod builder;
pub mod engine;
pub mod interner;
pub mod node;
pub mod overrides;
pub mod program;
pub mod registry;
pub mod resolver;
pub mod roles;
pub mod user_roles;

pub use builder::TrieBuilder;
pub use engine::{AuthUser, Layer, Layers, Trace, authorize, authorize_with_trace};
pub use interner::Interner;
pub use node::ParsedNode;
pub use overrides::{OverridePeek, UserOverrideCache, UserPrograms};
pub use program::{Explanation, Program};
pub use registry::{DeclareOptions, DeclaredPermission, NamespaceInfo, Registry};
pub use resolver::{GrantTarget, NodeRef, Resolver};
pub use roles::{DEFAULT_ROLE_NAME, RoleTree};
pub use user_roles::UserRoleCache;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tri-state result of evaluating a rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(i8)]
pub enum Decision {
    Deny = -1,
    Unset = 0,
    Allow = 1,
}

impl Decision {
    /// True only for an explicit allow.
    #[inline]
    pub fn is_allow(self) -> bool {
        self == Decision::Allow
    }

    #[inline]
    pub fn is_set(self) -> bool {
        self != Decision::Unset
    }

    pub fn name(&self) -> &'static str {
        match self {
            Decision::Deny => "deny",
            Decision::Unset => "unset",
            Decision::Allow => "allow",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Effect> for Decision {
    fn from(effect: Effect) -> Self {
        match effect {
            Effect::Allow => Decision::Allow,
            Effect::Deny => Decision::Deny,
        }
    }
}

/// Effect carried by a declaration default or a stored grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Effect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            other => Err(format!("unknown effect: {other}")),
        }
    }
}

/// Whether a rule targets one node or a node plus everything beneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Exact,
    Star,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Exact => "exact",
            RuleKind::Star => "star",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(RuleKind::Exact),
            "star" => Ok(RuleKind::Star),
            other => Err(format!("unknown rule kind: {other}")),
        }
    }
}

/// Owner of a stored grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    User,
    Role,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::User => "user",
            SubjectType::Role => "role",
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(SubjectType::User),
            "role" => Ok(SubjectType::Role),
            other => Err(format!("unknown subject type: {other}")),
        }
    }
}

/// Render a (namespace, kind, local) triple back into node-string form.
pub fn format_node(ns_key: &str, kind: RuleKind, local: &str) -> String {
    match (kind, local.is_empty()) {
        (RuleKind::Exact, _) => format!("{ns_key}.{local}"),
        (RuleKind::Star, true) => format!("{ns_key}.*"),
        (RuleKind::Star, false) => format!("{ns_key}.{local}.*"),
    }
}
