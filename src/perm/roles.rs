//! Role hierarchy with precomputed effective programs.
//!
//! Roles form a single-inheritance forest via `parent_id`. For every role and
//! every namespace touched by a grant anywhere in its ancestor chain, the
//! tree keeps one compiled program: grants are applied root ancestor first,
//! so a descendant's rule overwrites an ancestor's rule on the same node.
//!
//! Role ids handed to the engine are sorted by `(rank desc, id asc)`.

use super::builder::TrieBuilder;
use super::program::Program;
use super::registry::Registry;
use crate::store::{GrantRow, Role};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the protected role every user implicitly holds.
pub const DEFAULT_ROLE_NAME: &str = "default";

/// Effective programs of one role, indexed by namespace index.
type Effective = Vec<Option<Arc<Program>>>;

#[derive(Debug, Default)]
pub struct RoleTree {
    roles: HashMap<i64, Role>,
    children: HashMap<i64, Vec<i64>>,
    /// Each role's own grants, as last loaded from the store.
    grants: HashMap<i64, Vec<GrantRow>>,
    effective: HashMap<i64, Effective>,
    ranked: Vec<i64>,
    default_role: Option<i64>,
}

impl RoleTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the tree from store rows and compile every role.
    pub fn load(roles: Vec<Role>, grants: Vec<GrantRow>, registry: &mut Registry) -> Self {
        let mut tree = Self {
            roles: roles.into_iter().map(|r| (r.id, r)).collect(),
            ..Self::default()
        };
        for grant in grants {
            match grant.role_id() {
                Some(id) if tree.roles.contains_key(&id) => {
                    tree.grants.entry(id).or_default().push(grant)
                }
                _ => warn!(subject = %grant.subject_id, "skipping grant for unknown role"),
            }
        }
        tree.link();
        tree.recompile_all(registry);
        tree
    }

    /// Recompute parent/child links, rank order and the default role.
    fn link(&mut self) {
        self.children.clear();
        for role in self.roles.values() {
            if let Some(parent) = role.parent_id
                && self.roles.contains_key(&parent)
            {
                self.children.entry(parent).or_default().push(role.id);
            }
        }
        for kids in self.children.values_mut() {
            kids.sort_unstable();
        }

        self.ranked = self.roles.keys().copied().collect();
        let roles = &self.roles;
        self.ranked
            .sort_by(|a, b| roles[b].rank.cmp(&roles[a].rank).then(a.cmp(b)));

        self.default_role = self
            .roles
            .values()
            .filter(|r| r.name.as_deref() == Some(DEFAULT_ROLE_NAME))
            .map(|r| r.id)
            .min();
    }

    /// Recompile every role from cached grants. Used after namespace
    /// lifecycle changes, which invalidate namespace indices and interners.
    pub fn recompile_all(&mut self, registry: &mut Registry) {
        self.effective.clear();
        for id in self.ranked.clone() {
            let effective = self.compile(id, registry);
            self.effective.insert(id, effective);
        }
        debug!(roles = self.ranked.len(), "role programs compiled");
    }

    /// Replace one role's grants and recompile it and its descendants.
    pub fn refresh_subtree(&mut self, role_id: i64, grants: Vec<GrantRow>, registry: &mut Registry) {
        if !self.roles.contains_key(&role_id) {
            return;
        }
        self.grants.insert(role_id, grants);
        let subtree = self.subtree(role_id);
        for id in &subtree {
            let effective = self.compile(*id, registry);
            self.effective.insert(*id, effective);
        }
        debug!(role = role_id, recompiled = subtree.len(), "role subtree refreshed");
    }

    /// Role ids from the root ancestor down to `role_id`.
    pub fn ancestors(&self, role_id: i64) -> Vec<i64> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(role_id);
        while let Some(id) = current {
            let Some(role) = self.roles.get(&id) else {
                break;
            };
            if !seen.insert(id) {
                warn!(role = role_id, "role parent cycle detected");
                break;
            }
            chain.push(id);
            current = role.parent_id;
        }
        chain.reverse();
        chain
    }

    /// `role_id` and all of its descendants, parents before children.
    pub fn subtree(&self, role_id: i64) -> Vec<i64> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![role_id];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            out.push(id);
            if let Some(kids) = self.children.get(&id) {
                stack.extend(kids.iter().rev());
            }
        }
        out
    }

    /// Direct children of a role, ascending by id.
    pub fn children(&self, role_id: i64) -> &[i64] {
        self.children.get(&role_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// True if making `parent` the parent of `role_id` would close a loop.
    pub fn would_cycle(&self, role_id: i64, parent: i64) -> bool {
        parent == role_id || self.ancestors(parent).contains(&role_id)
    }

    fn compile(&self, role_id: i64, registry: &mut Registry) -> Effective {
        // Chain order, root first, grouped by namespace.
        let mut by_ns: BTreeMap<&str, Vec<&GrantRow>> = BTreeMap::new();
        for id in self.ancestors(role_id) {
            for grant in self.grants.get(&id).into_iter().flatten() {
                by_ns.entry(grant.ns_key.as_str()).or_default().push(grant);
            }
        }

        let mut effective: Effective = vec![None; registry.len()];
        for (ns_key, grants) in by_ns {
            let Some(state) = registry.get_active_mut(ns_key) else {
                debug!(role = role_id, ns = %ns_key, "skipping grants for inactive namespace");
                continue;
            };
            let mut builder = TrieBuilder::new();
            for grant in grants {
                match state.intern_local(&grant.local) {
                    Ok(path) => builder.set(grant.kind, &path, grant.effect),
                    Err(e) => {
                        warn!(role = role_id, ns = %ns_key, local = %grant.local, error = %e, "skipping malformed role grant")
                    }
                }
            }
            effective[state.index() as usize] = Some(Arc::new(builder.freeze()));
        }
        effective
    }

    /// Effective program of a role for one namespace.
    #[inline]
    pub fn effective(&self, role_id: i64, ns_index: u32) -> Option<&Program> {
        self.effective
            .get(&role_id)?
            .get(ns_index as usize)?
            .as_deref()
    }

    /// Sort role ids by `(rank desc, id asc)`, dropping unknown ids.
    pub fn rank_sort(&self, ids: &mut Vec<i64>) {
        ids.retain(|id| self.roles.contains_key(id));
        ids.sort_unstable_by(|a, b| {
            self.roles[b]
                .rank
                .cmp(&self.roles[a].rank)
                .then(a.cmp(b))
        });
        ids.dedup();
    }

    /// All role ids in evaluation order.
    pub fn ranked(&self) -> &[i64] {
        &self.ranked
    }

    pub fn role(&self, id: i64) -> Option<&Role> {
        self.roles.get(&id)
    }

    /// Roles in evaluation order.
    pub fn roles(&self) -> Vec<Role> {
        self.ranked.iter().map(|id| self.roles[id].clone()).collect()
    }

    pub fn default_role(&self) -> Option<i64> {
        self.default_role
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perm::{Decision, DeclareOptions, Effect, RuleKind, SubjectType};

    fn role(id: i64, parent_id: Option<i64>, rank: i64) -> Role {
        Role {
            id,
            name: None,
            parent_id,
            rank,
            updated_at: 0,
        }
    }

    fn grant(role: i64, kind: RuleKind, local: &str, effect: Effect) -> GrantRow {
        GrantRow {
            subject_type: SubjectType::Role,
            subject_id: role.to_string(),
            ns_key: "ns".to_string(),
            kind,
            local: local.to_string(),
            effect,
            updated_at: 0,
        }
    }

    fn registry() -> Registry {
        let mut r = Registry::new();
        r.declare_star("ns", "", DeclareOptions::deny()).unwrap();
        r
    }

    fn decide(tree: &RoleTree, registry: &Registry, role: i64, local: &str) -> Decision {
        let ns = registry.get("ns").unwrap();
        let (path, _) = ns.interner().lookup_local(local).unwrap();
        tree.effective(role, ns.index())
            .map(|p| p.decide(&path))
            .unwrap_or(Decision::Unset)
    }

    #[test]
    fn test_rank_order() {
        let mut registry = registry();
        let tree = RoleTree::load(
            vec![role(1, None, 0), role(2, None, 10), role(3, None, 10)],
            vec![],
            &mut registry,
        );
        assert_eq!(tree.ranked(), &[2, 3, 1]);

        let mut ids = vec![1, 3, 99, 2, 3];
        tree.rank_sort(&mut ids);
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_descendant_overrides_ancestor() {
        let mut registry = registry();
        let tree = RoleTree::load(
            vec![role(1, None, 0), role(2, Some(1), 10)],
            vec![
                grant(1, RuleKind::Exact, "cmd", Effect::Deny),
                grant(1, RuleKind::Exact, "other", Effect::Allow),
                grant(2, RuleKind::Exact, "cmd", Effect::Allow),
            ],
            &mut registry,
        );
        assert_eq!(decide(&tree, &registry, 1, "cmd"), Decision::Deny);
        assert_eq!(decide(&tree, &registry, 2, "cmd"), Decision::Allow);
        // Inherited from the parent.
        assert_eq!(decide(&tree, &registry, 2, "other"), Decision::Allow);
    }

    #[test]
    fn test_refresh_subtree_reaches_descendants() {
        let mut registry = registry();
        let mut tree = RoleTree::load(
            vec![role(1, None, 0), role(2, Some(1), 0), role(3, None, 0)],
            vec![],
            &mut registry,
        );
        assert!(tree.effective(2, 0).is_none());

        tree.refresh_subtree(
            1,
            vec![grant(1, RuleKind::Star, "admin", Effect::Allow)],
            &mut registry,
        );
        assert_eq!(decide(&tree, &registry, 2, "admin.kick"), Decision::Allow);
        assert!(tree.effective(3, 0).is_none());
        assert_eq!(tree.subtree(1), vec![1, 2]);
        assert_eq!(tree.children(1), &[2]);
        assert!(tree.children(3).is_empty());
    }

    #[test]
    fn test_cycles_are_contained() {
        let mut registry = registry();
        let tree = RoleTree::load(
            vec![role(1, Some(2), 0), role(2, Some(1), 0), role(3, None, 0)],
            vec![grant(1, RuleKind::Exact, "a", Effect::Allow)],
            &mut registry,
        );
        assert_eq!(tree.ancestors(1), vec![2, 1]);
        assert!(tree.would_cycle(3, 3));
        assert!(!tree.would_cycle(3, 1));
        assert!(tree.would_cycle(1, 2));
        assert_eq!(decide(&tree, &registry, 1, "a"), Decision::Allow);
    }

    #[test]
    fn test_grants_for_unknown_namespace_skipped() {
        let mut registry = registry();
        let mut g = grant(1, RuleKind::Exact, "a", Effect::Allow);
        g.ns_key = "missing".to_string();
        let tree = RoleTree::load(vec![role(1, None, 0)], vec![g], &mut registry);
        assert!(tree.effective(1, 0).is_none());
    }

    #[test]
    fn test_default_role_detected_by_name() {
        let mut registry = registry();
        let mut default = role(4, None, 0);
        default.name = Some(DEFAULT_ROLE_NAME.to_string());
        let tree = RoleTree::load(vec![role(1, None, 0), default], vec![], &mut registry);
        assert_eq!(tree.default_role(), Some(4));
    }
}
