//! Namespace registry.
//!
//! One [`NamespaceState`] per plugin, each owning its own interner, rule
//! builder, frozen declaration program and declared-permission catalog.
//!
//! # Lifecycle
//!
//! - A namespace is created lazily by its first declaration and keeps its
//!   dense index for the life of the process.
//! - Removal marks it inactive, bumps its epoch and swaps in fresh empty
//!   structures. References resolved under the old epoch stop matching.
//! - Declaring again reactivates it at the same index under a new epoch.

use super::builder::TrieBuilder;
use super::interner::{EmptySegment, Interner};
use super::node::{validate_exact_local, validate_namespace, validate_star_prefix};
use super::program::Program;
use super::{Effect, RuleKind, format_node};
use crate::error::PermResult;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Options accepted by a declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclareOptions {
    /// Effect applied when no user or role rule decides.
    pub default: Effect,
    pub description: Option<String>,
    /// Free-form plugin metadata, kept for introspection only.
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl Default for DeclareOptions {
    fn default() -> Self {
        Self::deny()
    }
}

impl DeclareOptions {
    pub fn allow() -> Self {
        Self::with_default(Effect::Allow)
    }

    pub fn deny() -> Self {
        Self::with_default(Effect::Deny)
    }

    pub fn with_default(default: Effect) -> Self {
        Self {
            default,
            description: None,
            meta: serde_json::Map::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

/// Catalog record for one declared node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeclaredPermission {
    pub ns_key: String,
    pub kind: RuleKind,
    /// Exact local path, or star prefix (empty for the root wildcard).
    pub local: String,
    pub default: Effect,
    pub description: Option<String>,
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl DeclaredPermission {
    /// Full node string, e.g. `shop.admin.*`.
    pub fn node(&self) -> String {
        format_node(&self.ns_key, self.kind, &self.local)
    }
}

/// Introspection summary of a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceInfo {
    pub key: String,
    pub index: u32,
    pub epoch: u64,
    pub active: bool,
    pub permission_count: usize,
}

/// Live state of one namespace.
#[derive(Debug)]
pub struct NamespaceState {
    key: String,
    index: u32,
    epoch: u64,
    active: bool,
    interner: Interner,
    builder: TrieBuilder,
    program: Arc<Program>,
    exact: BTreeMap<String, DeclaredPermission>,
    star: BTreeMap<String, DeclaredPermission>,
}

impl NamespaceState {
    fn new(key: &str, index: u32) -> Self {
        Self {
            key: key.to_string(),
            index,
            epoch: 1,
            active: true,
            interner: Interner::new(),
            builder: TrieBuilder::new(),
            program: Arc::new(Program::empty()),
            exact: BTreeMap::new(),
            star: BTreeMap::new(),
        }
    }

    fn reset(&mut self) {
        self.interner = Interner::new();
        self.builder = TrieBuilder::new();
        self.program = Arc::new(Program::empty());
        self.exact.clear();
        self.star.clear();
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    /// Compile a local path, interning new segments.
    pub fn intern_local(&mut self, local: &str) -> Result<Vec<u32>, EmptySegment> {
        self.interner.compile_local(local)
    }

    /// Frozen declaration program.
    #[inline]
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn permission_count(&self) -> usize {
        self.exact.len() + self.star.len()
    }

    pub fn declared(&self, kind: RuleKind, local: &str) -> Option<&DeclaredPermission> {
        match kind {
            RuleKind::Exact => self.exact.get(local),
            RuleKind::Star => self.star.get(local),
        }
    }

    /// True if a declared star rule covers `prefix`: the root wildcard, a
    /// star at `prefix` itself, or a star at any shorter prefix.
    pub fn covers_star(&self, prefix: &str) -> bool {
        if self.star.is_empty() {
            return false;
        }
        if self.star.contains_key("") || self.star.contains_key(prefix) {
            return true;
        }
        prefix
            .match_indices('.')
            .any(|(i, _)| self.star.contains_key(&prefix[..i]))
    }

    /// True if the exact node is declared or covered by a declared star.
    pub fn covers_exact(&self, local: &str) -> bool {
        self.exact.contains_key(local) || self.covers_star(local)
    }

    /// True if a rule of `kind` at `local` is reachable through the catalog.
    pub fn covers(&self, kind: RuleKind, local: &str) -> bool {
        match kind {
            RuleKind::Exact => self.covers_exact(local),
            RuleKind::Star => self.covers_star(local),
        }
    }

    pub fn info(&self) -> NamespaceInfo {
        NamespaceInfo {
            key: self.key.clone(),
            index: self.index,
            epoch: self.epoch,
            active: self.active,
            permission_count: self.permission_count(),
        }
    }

    pub fn permissions(&self) -> impl Iterator<Item = &DeclaredPermission> {
        self.exact.values().chain(self.star.values())
    }
}

/// Owner of all namespace states.
#[derive(Debug, Default)]
pub struct Registry {
    by_key: HashMap<String, u32>,
    namespaces: Vec<NamespaceState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an exact node. Returns `true` if the namespace became active.
    pub fn declare_exact(
        &mut self,
        ns_key: &str,
        local: &str,
        options: DeclareOptions,
    ) -> PermResult<bool> {
        validate_namespace(ns_key)?;
        validate_exact_local(ns_key, local)?;
        Ok(self.declare(ns_key, RuleKind::Exact, local, options))
    }

    /// Declare a star rule over `prefix` (empty for the root wildcard).
    /// Returns `true` if the namespace became active.
    pub fn declare_star(
        &mut self,
        ns_key: &str,
        prefix: &str,
        options: DeclareOptions,
    ) -> PermResult<bool> {
        validate_namespace(ns_key)?;
        validate_star_prefix(ns_key, prefix)?;
        Ok(self.declare(ns_key, RuleKind::Star, prefix, options))
    }

    fn declare(
        &mut self,
        ns_key: &str,
        kind: RuleKind,
        local: &str,
        options: DeclareOptions,
    ) -> bool {
        let (index, activated) = self.activate(ns_key);
        let state = &mut self.namespaces[index as usize];

        // Locals were validated by the caller, so compilation cannot fail.
        let path = match state.interner.compile_local(local) {
            Ok(path) => path,
            Err(_) => return activated,
        };
        state.builder.set(kind, &path, options.default);
        state.program = Arc::new(state.builder.freeze());

        let record = DeclaredPermission {
            ns_key: ns_key.to_string(),
            kind,
            local: local.to_string(),
            default: options.default,
            description: options.description,
            meta: options.meta,
        };
        debug!(
            node = %record.node(),
            default = %record.default,
            nodes = state.program.node_count(),
            "permission declared"
        );
        match kind {
            RuleKind::Exact => state.exact.insert(local.to_string(), record),
            RuleKind::Star => state.star.insert(local.to_string(), record),
        };
        activated
    }

    /// Find or create the namespace and make sure it is active.
    fn activate(&mut self, ns_key: &str) -> (u32, bool) {
        if let Some(&index) = self.by_key.get(ns_key) {
            let state = &mut self.namespaces[index as usize];
            if state.active {
                return (index, false);
            }
            state.active = true;
            state.epoch += 1;
            info!(ns = %ns_key, index, epoch = state.epoch, "namespace reactivated");
            return (index, true);
        }

        let index = self.namespaces.len() as u32;
        self.namespaces.push(NamespaceState::new(ns_key, index));
        self.by_key.insert(ns_key.to_string(), index);
        info!(ns = %ns_key, index, "namespace created");
        (index, true)
    }

    /// Tear a namespace down. Returns `false` if it was unknown or inactive.
    pub fn remove_namespace(&mut self, ns_key: &str) -> bool {
        let Some(&index) = self.by_key.get(ns_key) else {
            return false;
        };
        let state = &mut self.namespaces[index as usize];
        if !state.active {
            return false;
        }
        state.active = false;
        state.epoch += 1;
        state.reset();
        info!(ns = %ns_key, index, epoch = state.epoch, "namespace removed");
        true
    }

    pub fn index_of(&self, ns_key: &str) -> Option<u32> {
        self.by_key.get(ns_key).copied()
    }

    pub fn get(&self, ns_key: &str) -> Option<&NamespaceState> {
        self.index_of(ns_key).map(|i| &self.namespaces[i as usize])
    }

    /// Active namespace by key, for grant compilation.
    pub fn get_active_mut(&mut self, ns_key: &str) -> Option<&mut NamespaceState> {
        let index = self.index_of(ns_key)?;
        let state = &mut self.namespaces[index as usize];
        if state.active { Some(state) } else { None }
    }

    #[inline]
    pub fn namespace(&self, index: u32) -> Option<&NamespaceState> {
        self.namespaces.get(index as usize)
    }

    /// True if `index` names an active namespace still at `epoch`.
    #[inline]
    pub fn is_current(&self, index: u32, epoch: u64) -> bool {
        self.namespaces
            .get(index as usize)
            .is_some_and(|ns| ns.active && ns.epoch == epoch)
    }

    /// Number of namespace slots ever allocated.
    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    pub fn list_namespaces(&self) -> Vec<NamespaceInfo> {
        self.namespaces.iter().map(NamespaceState::info).collect()
    }

    /// Declared permissions of one namespace, exact rules first, each sorted
    /// by local path. Empty if the namespace is unknown or inactive.
    pub fn list_permissions(&self, ns_key: &str) -> Vec<DeclaredPermission> {
        self.get(ns_key)
            .map(|ns| ns.permissions().cloned().collect())
            .unwrap_or_default()
    }
}
