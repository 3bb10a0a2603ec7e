//! Permission service facade.
//!
//! Ties the registry, resolver, role tree and user override cache to a
//! [`GrantStore`]. Lock order is always registry, then roles, then the
//! override cache. No lock is held across an `.await`: async operations load from the store first and only
//! then take the locks they need to apply the result.

use crate::config::EngineConfig;
use crate::error::{PermError, PermResult};
use crate::perm::{
    AuthUser, Decision, DeclareOptions, DeclaredPermission, Effect, Layers, NamespaceInfo,
    NodeRef, OverridePeek, ParsedNode, Registry, Resolver, RoleTree, RuleKind, SubjectType, Trace,
    UserOverrideCache, UserPrograms, UserRoleCache, DEFAULT_ROLE_NAME, authorize,
    authorize_with_trace,
};
use crate::store::{GrantRow, GrantStore, Role, RolePatch};
use crate::telemetry::spans;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{Instrument, debug, info};

pub struct PermissionService {
    store: Arc<dyn GrantStore>,
    registry: RwLock<Registry>,
    resolver: Resolver,
    roles: RwLock<RoleTree>,
    user_roles: UserRoleCache,
    overrides: UserOverrideCache,
    config: EngineConfig,
}

impl PermissionService {
    /// Create a service with an empty catalog. Call [`bootstrap`] before use.
    ///
    /// [`bootstrap`]: PermissionService::bootstrap
    pub fn new(store: Arc<dyn GrantStore>, config: EngineConfig) -> Self {
        Self {
            store,
            registry: RwLock::new(Registry::new()),
            resolver: Resolver::new(config.resolver_cache_capacity),
            roles: RwLock::new(RoleTree::new()),
            user_roles: UserRoleCache::new(config.role_cache_capacity, config.role_cache_ttl()),
            overrides: UserOverrideCache::new(config.user_cache_capacity, config.user_cache_ttl()),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn GrantStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ensure the default role exists and load the role tree.
    pub async fn bootstrap(&self) -> PermResult<()> {
        let roles = self.store.list_roles().await?;
        if !roles
            .iter()
            .any(|r| r.name.as_deref() == Some(DEFAULT_ROLE_NAME))
        {
            let id = self
                .store
                .create_role(None, 0, Some(DEFAULT_ROLE_NAME))
                .await?;
            info!(role = id, "default role created");
        }
        self.refresh_all().await
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    pub fn declare_exact(&self, ns_key: &str, local: &str, options: DeclareOptions) -> PermResult<()> {
        let mut registry = self.registry.write();
        let activated = registry.declare_exact(ns_key, local, options)?;
        if activated {
            self.on_namespace_activated(&mut registry);
        }
        Ok(())
    }

    pub fn declare_star(&self, ns_key: &str, prefix: &str, options: DeclareOptions) -> PermResult<()> {
        let mut registry = self.registry.write();
        let activated = registry.declare_star(ns_key, prefix, options)?;
        if activated {
            self.on_namespace_activated(&mut registry);
        }
        Ok(())
    }

    /// Declare from a full node string, e.g. `shop.admin.*`.
    pub fn declare_node(&self, node: &str, options: DeclareOptions) -> PermResult<()> {
        let parsed = ParsedNode::parse(node)?;
        match parsed.kind {
            RuleKind::Exact => self.declare_exact(parsed.ns, parsed.local, options),
            RuleKind::Star => self.declare_star(parsed.ns, parsed.local, options),
        }
    }

    /// Grants stored for a namespace that was inactive were skipped at
    /// compile time; pick them up now.
    fn on_namespace_activated(&self, registry: &mut Registry) {
        self.roles.write().recompile_all(registry);
        self.overrides.clear();
    }

    /// Tear a namespace down. Returns `false` if it was not active.
    pub fn remove_namespace(&self, ns_key: &str) -> bool {
        let mut registry = self.registry.write();
        if !registry.remove_namespace(ns_key) {
            return false;
        }
        self.resolver.clear();
        self.overrides.clear();
        self.roles.write().recompile_all(&mut registry);
        true
    }

    pub fn list_namespaces(&self) -> Vec<NamespaceInfo> {
        self.registry.read().list_namespaces()
    }

    pub fn list_permissions(&self, ns_key: &str) -> Vec<DeclaredPermission> {
        self.registry.read().list_permissions(ns_key)
    }

    // ========================================================================
    // Grants
    // ========================================================================

    /// Store a rule for a user or role. The node must be declared with a
    /// matching kind.
    pub async fn grant(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        effect: Effect,
        node: &str,
    ) -> PermResult<()> {
        async {
            let target = Resolver::resolve_grant(&self.registry.read(), node)?;
            if subject_type == SubjectType::Role {
                let role_id = parse_role_subject(subject_id)?;
                if self.roles.read().role(role_id).is_none() {
                    return Err(PermError::RoleNotFound(role_id));
                }
            }
            let row = GrantRow {
                subject_type,
                subject_id: subject_id.to_string(),
                ns_key: target.ns_key,
                kind: target.kind,
                local: target.local,
                effect,
                updated_at: chrono::Utc::now().timestamp(),
            };
            self.store.upsert_grant(&row).await?;
            info!(%effect, "grant stored");
            self.after_grant_change(subject_type, subject_id).await
        }
        .instrument(spans::mutation("grant", subject_type, subject_id, node))
        .await
    }

    /// Remove a rule. Only the node syntax is checked, so grants left behind
    /// by a removed namespace can still be cleaned up. Returns whether a
    /// rule existed.
    pub async fn revoke(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        node: &str,
    ) -> PermResult<bool> {
        async {
            let target = Resolver::resolve_revoke(node)?;
            if subject_type == SubjectType::Role {
                parse_role_subject(subject_id)?;
            }
            let row = GrantRow {
                subject_type,
                subject_id: subject_id.to_string(),
                ns_key: target.ns_key,
                kind: target.kind,
                local: target.local,
                effect: Effect::Deny,
                updated_at: chrono::Utc::now().timestamp(),
            };
            let existed = self.store.revoke_grant(&row).await?;
            info!(existed, "grant revoked");
            self.after_grant_change(subject_type, subject_id).await?;
            Ok::<_, PermError>(existed)
        }
        .instrument(spans::mutation("revoke", subject_type, subject_id, node))
        .await
    }

    async fn after_grant_change(&self, subject_type: SubjectType, subject_id: &str) -> PermResult<()> {
        match subject_type {
            SubjectType::User => {
                self.overrides.invalidate(subject_id);
                Ok(())
            }
            SubjectType::Role => {
                let role_id = parse_role_subject(subject_id)?;
                self.refresh_role_subtree(role_id).await
            }
        }
    }

    // ========================================================================
    // Roles
    // ========================================================================

    pub async fn create_role(
        &self,
        parent_id: Option<i64>,
        rank: i64,
        name: Option<&str>,
    ) -> PermResult<i64> {
        if let Some(parent) = parent_id {
            self.require_role(parent)?;
        }
        let id = self.store.create_role(parent_id, rank, name).await?;
        info!(role = id, ?parent_id, rank, "role created");
        self.refresh_all().await?;
        Ok(id)
    }

    /// Apply a partial update. The default role only accepts rank changes.
    pub async fn update_role(&self, id: i64, patch: RolePatch) -> PermResult<()> {
        {
            let roles = self.roles.read();
            if roles.role(id).is_none() {
                return Err(PermError::RoleNotFound(id));
            }
            if roles.default_role() == Some(id) && (patch.parent_id.is_some() || patch.name.is_some()) {
                return Err(PermError::ProtectedRole);
            }
            if let Some(Some(parent)) = patch.parent_id {
                if roles.role(parent).is_none() {
                    return Err(PermError::RoleNotFound(parent));
                }
                if roles.would_cycle(id, parent) {
                    return Err(PermError::RoleCycle { role: id, parent });
                }
            }
        }
        if patch.is_empty() {
            return Ok(());
        }

        self.store.update_role(id, &patch).await?;
        info!(role = id, "role updated");
        self.refresh_all().await
    }

    /// Delete a role. Its children move up to its parent.
    pub async fn delete_role(&self, id: i64) -> PermResult<()> {
        let children = {
            let roles = self.roles.read();
            if roles.default_role() == Some(id) {
                return Err(PermError::ProtectedRole);
            }
            roles.role(id).ok_or(PermError::RoleNotFound(id))?;
            roles.children(id).len()
        };

        self.store.delete_role(id).await?;
        info!(role = id, reparented = children, "role deleted");
        self.refresh_all().await
    }

    /// Roles in evaluation order.
    pub fn list_roles(&self) -> Vec<Role> {
        self.roles.read().roles()
    }

    pub async fn assign_role(&self, user_id: &str, role_id: i64) -> PermResult<()> {
        self.require_role(role_id)?;
        self.store.assign_role_to_user(user_id, role_id).await?;
        self.user_roles.invalidate(user_id);
        info!(user = %user_id, role = role_id, "role assigned");
        Ok(())
    }

    pub async fn unassign_role(&self, user_id: &str, role_id: i64) -> PermResult<()> {
        self.store.unassign_role_from_user(user_id, role_id).await?;
        self.user_roles.invalidate(user_id);
        info!(user = %user_id, role = role_id, "role unassigned");
        Ok(())
    }

    /// Reload every role and role grant from the store.
    pub async fn refresh_all(&self) -> PermResult<()> {
        let roles = self.store.list_roles().await?;
        let ids: Vec<i64> = roles.iter().map(|r| r.id).collect();
        let grants = self.store.list_role_grants(&ids).await?;
        {
            let mut registry = self.registry.write();
            let tree = RoleTree::load(roles, grants, &mut registry);
            *self.roles.write() = tree;
        }
        self.user_roles.clear();
        Ok(())
    }

    /// Reload one role's grants and recompile it and its descendants.
    pub async fn refresh_role_subtree(&self, role_id: i64) -> PermResult<()> {
        let grants = self.store.list_role_grants(&[role_id]).await?;
        {
            let mut registry = self.registry.write();
            self.roles
                .write()
                .refresh_subtree(role_id, grants, &mut registry);
        }
        self.user_roles.clear();
        Ok(())
    }

    fn require_role(&self, role_id: i64) -> PermResult<()> {
        match self.roles.read().role(role_id) {
            Some(_) => Ok(()),
            None => Err(PermError::RoleNotFound(role_id)),
        }
    }

    // ========================================================================
    // Authorization
    // ========================================================================

    /// Resolve a node string against the current catalog.
    pub fn resolve(&self, node: &str) -> Option<NodeRef> {
        self.resolver.resolve(&self.registry.read(), node)
    }

    /// Authorization view of a user, loading the role list on a miss.
    pub async fn auth_user(&self, user_id: &str) -> PermResult<AuthUser> {
        if let Some(user) = self.peek_auth_user(user_id) {
            return Ok(user);
        }

        let generation = self.user_roles.generation();
        let mut ids = self.store.list_user_role_ids(user_id).await?;
        let sorted: Arc<[i64]> = {
            let roles = self.roles.read();
            ids.extend(roles.default_role());
            roles.rank_sort(&mut ids);
            ids.into()
        };
        self.user_roles
            .insert(user_id, Arc::clone(&sorted), generation);
        debug!(user = %user_id, roles = sorted.len(), "user roles loaded");
        Ok(AuthUser::new(user_id, sorted))
    }

    /// Cached authorization view, or `None` on a miss or expiry.
    pub fn peek_auth_user(&self, user_id: &str) -> Option<AuthUser> {
        self.user_roles
            .peek(user_id)
            .map(|roles| AuthUser::new(user_id, roles))
    }

    async fn user_overrides(&self, user_id: &str) -> PermResult<Option<Arc<UserPrograms>>> {
        match self.overrides.peek(user_id) {
            OverridePeek::Programs(programs) => return Ok(Some(programs)),
            OverridePeek::Negative => return Ok(None),
            OverridePeek::Unknown => {}
        }

        let generation = self.overrides.generation();
        let rows = self.store.list_grants(SubjectType::User, user_id).await?;
        // Hold the registry until the entry is cached so a namespace
        // teardown cannot slip between compile and insert.
        let mut registry = self.registry.write();
        let programs = UserPrograms::compile(&rows, &mut registry);
        debug!(user = %user_id, grants = rows.len(), "user overrides compiled");
        Ok(self.overrides.insert(user_id, programs, generation))
    }

    fn decide(&self, role_ids: &[i64], overrides: Option<&UserPrograms>, node: &NodeRef) -> Decision {
        let registry = self.registry.read();
        let roles = self.roles.read();
        authorize(
            node,
            &Layers {
                registry: &registry,
                roles: &roles,
                user: overrides,
                role_ids,
            },
        )
    }

    /// Full authorization, loading whatever is cold from the store.
    pub async fn authorize_user(&self, user_id: &str, node: &str) -> PermResult<Decision> {
        async {
            // Load first: compiling overrides can grow a namespace's
            // vocabulary, which changes how `node` resolves.
            let user = self.auth_user(user_id).await?;
            let overrides = self.user_overrides(user_id).await?;
            let Some(node) = self.resolve(node) else {
                return Ok::<_, PermError>(Decision::Deny);
            };
            Ok(self.decide(user.roles(), overrides.as_deref(), &node))
        }
        .instrument(spans::authorize(user_id, node))
        .await
    }

    /// Non-suspending authorization by node string. `None` when the user's
    /// roles or overrides are not warm.
    pub fn authorize_user_sync(&self, user_id: &str, node: &str) -> Option<Decision> {
        let role_ids = self.user_roles.peek(user_id)?;
        let overrides = match self.overrides.peek(user_id) {
            OverridePeek::Programs(programs) => Some(programs),
            OverridePeek::Negative => None,
            OverridePeek::Unknown => return None,
        };
        let Some(node) = self.resolve(node) else {
            return Some(Decision::Deny);
        };
        Some(self.decide(&role_ids, overrides.as_deref(), &node))
    }

    /// Hot path over a pre-resolved node. `None` when the overrides are not
    /// warm or `node` is out of date: resolved under an older namespace
    /// epoch, or holding a segment that has since been interned.
    pub fn authorize_user_fast(&self, user: &AuthUser, node: &NodeRef) -> Option<Decision> {
        let overrides = match self.overrides.peek(&user.user_id) {
            OverridePeek::Programs(programs) => Some(programs),
            OverridePeek::Negative => None,
            OverridePeek::Unknown => return None,
        };
        let registry = self.registry.read();
        if !node.is_fresh(&registry) {
            return None;
        }
        let roles = self.roles.read();
        Some(authorize(
            node,
            &Layers {
                registry: &registry,
                roles: &roles,
                user: overrides.as_deref(),
                role_ids: user.roles(),
            },
        ))
    }

    pub async fn can_user(&self, user_id: &str, node: &str) -> PermResult<bool> {
        Ok(self.authorize_user(user_id, node).await?.is_allow())
    }

    pub fn can_user_fast(&self, user: &AuthUser, node: &NodeRef) -> Option<bool> {
        self.authorize_user_fast(user, node).map(Decision::is_allow)
    }

    /// Explain which layer and rule decide `node` for a user.
    pub async fn explain_user(&self, user_id: &str, node: &str) -> PermResult<Trace> {
        let user = self.auth_user(user_id).await?;
        let overrides = self.user_overrides(user_id).await?;
        let Some(node) = self.resolve(node) else {
            return Ok(Trace::fallback());
        };

        let registry = self.registry.read();
        let roles = self.roles.read();
        Ok(authorize_with_trace(
            &node,
            &Layers {
                registry: &registry,
                roles: &roles,
                user: overrides.as_deref(),
                role_ids: user.roles(),
            },
        ))
    }
}

fn parse_role_subject(subject_id: &str) -> PermResult<i64> {
    subject_id
        .parse()
        .map_err(|_| PermError::InvalidSubject(subject_id.to_string()))
}
