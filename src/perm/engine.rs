//! Layered authorization.
//!
//! Order: the user's own overrides, then each held role in `(rank desc,
//! id asc)` order, then the namespace declaration, then `Deny`. The first
//! layer with a non-`Unset` answer wins, so a more specific layer's allow
//! beats a broader layer's deny. "Deny beats allow" only applies inside one
//! program.

use super::program::Program;
use super::registry::Registry;
use super::resolver::NodeRef;
use super::roles::RoleTree;
use super::{Decision, RuleKind, UserPrograms, format_node};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Authorization-time view of a user: role ids already in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
    roles: Arc<[i64]>,
}

impl AuthUser {
    /// Build from role ids that are already sorted.
    pub fn new(user_id: impl Into<String>, sorted_roles: Arc<[i64]>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: sorted_roles,
        }
    }

    #[inline]
    pub fn roles(&self) -> &[i64] {
        &self.roles
    }

    pub fn shared_roles(&self) -> Arc<[i64]> {
        Arc::clone(&self.roles)
    }
}

/// Everything one evaluation reads.
#[derive(Clone, Copy)]
pub struct Layers<'a> {
    pub registry: &'a Registry,
    pub roles: &'a RoleTree,
    /// `None` when the user has no grants.
    pub user: Option<&'a UserPrograms>,
    pub role_ids: &'a [i64],
}

#[inline]
fn run(program: &Program, node: &NodeRef) -> Decision {
    match node.kind {
        RuleKind::Exact => program.decide(&node.path),
        RuleKind::Star => program.decide_star(&node.path),
    }
}

/// Decide `node` through every layer. Stale references deny.
#[inline]
pub fn authorize(node: &NodeRef, layers: &Layers<'_>) -> Decision {
    if !node.is_current(layers.registry) {
        return Decision::Deny;
    }

    if let Some(user) = layers.user
        && let Some(program) = user.program(node.ns, node.epoch)
    {
        let decision = run(program, node);
        if decision.is_set() {
            return decision;
        }
    }

    for &role in layers.role_ids {
        if let Some(program) = layers.roles.effective(role, node.ns) {
            let decision = run(program, node);
            if decision.is_set() {
                return decision;
            }
        }
    }

    if let Some(ns) = layers.registry.namespace(node.ns) {
        let decision = run(ns.program(), node);
        if decision.is_set() {
            return decision;
        }
    }

    Decision::Deny
}

/// Layer that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    User,
    Role(i64),
    Declaration,
    /// Nothing matched, or the reference was stale or unresolvable.
    Fallback,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::User => f.write_str("user"),
            Layer::Role(id) => write!(f, "role:{id}"),
            Layer::Declaration => f.write_str("declaration"),
            Layer::Fallback => f.write_str("fallback"),
        }
    }
}

/// Diagnostic account of one authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trace {
    pub decision: Decision,
    pub layer: Layer,
    /// Literal winning rule, e.g. `shop.admin.*`.
    pub rule: Option<String>,
    /// Segments above the winning node.
    pub depth: usize,
}

impl Trace {
    pub fn fallback() -> Self {
        Self {
            decision: Decision::Deny,
            layer: Layer::Fallback,
            rule: None,
            depth: 0,
        }
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rule {
            Some(rule) => write!(f, "{} by {} ({})", self.decision, self.layer, rule),
            None => write!(f, "{} by {}", self.decision, self.layer),
        }
    }
}

/// Same walk as [`authorize`], reporting the winning layer and rule.
/// Diagnostics only.
pub fn authorize_with_trace(node: &NodeRef, layers: &Layers<'_>) -> Trace {
    if !node.is_current(layers.registry) {
        return Trace::fallback();
    }
    let Some(ns) = layers.registry.namespace(node.ns) else {
        return Trace::fallback();
    };

    let explain = |program: &Program, layer: Layer| -> Option<Trace> {
        let e = program.explain(&node.path, node.kind);
        let kind = e.kind?;
        let local = ns.interner().render(&node.path[..e.depth]);
        Some(Trace {
            decision: e.decision,
            layer,
            rule: Some(format_node(ns.key(), kind, &local)),
            depth: e.depth,
        })
    };

    if let Some(user) = layers.user
        && let Some(program) = user.program(node.ns, node.epoch)
        && let Some(trace) = explain(program, Layer::User)
    {
        return trace;
    }

    for &role in layers.role_ids {
        if let Some(program) = layers.roles.effective(role, node.ns)
            && let Some(trace) = explain(program, Layer::Role(role))
        {
            return trace;
        }
    }

    explain(ns.program(), Layer::Declaration).unwrap_or_else(Trace::fallback)
}
