//! In-memory grant store.

use super::{GrantRow, GrantStore, Role, RolePatch, StoreError};
use crate::perm::SubjectType;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
struct Inner {
    next_role_id: i64,
    roles: BTreeMap<i64, Role>,
    user_roles: BTreeMap<String, BTreeSet<i64>>,
    grants: Vec<GrantRow>,
}

/// [`GrantStore`] backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored grant rows.
    pub fn grant_count(&self) -> usize {
        self.inner.lock().grants.len()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl GrantStore for MemoryStore {
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        Ok(self.inner.lock().roles.values().cloned().collect())
    }

    async fn create_role(
        &self,
        parent_id: Option<i64>,
        rank: i64,
        name: Option<&str>,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(parent) = parent_id
            && !inner.roles.contains_key(&parent)
        {
            return Err(StoreError::RoleNotFound(parent));
        }
        inner.next_role_id += 1;
        let id = inner.next_role_id;
        inner.roles.insert(
            id,
            Role {
                id,
                name: name.map(String::from),
                parent_id,
                rank,
                updated_at: now(),
            },
        );
        Ok(id)
    }

    async fn update_role(&self, id: i64, patch: &RolePatch) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let role = inner.roles.get_mut(&id).ok_or(StoreError::RoleNotFound(id))?;
        if let Some(name) = &patch.name {
            role.name = name.clone();
        }
        if let Some(parent_id) = patch.parent_id {
            role.parent_id = parent_id;
        }
        if let Some(rank) = patch.rank {
            role.rank = rank;
        }
        role.updated_at = now();
        Ok(())
    }

    async fn delete_role(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let Some(removed) = inner.roles.remove(&id) else {
            return Err(StoreError::RoleNotFound(id));
        };
        let updated_at = now();
        for role in inner.roles.values_mut() {
            if role.parent_id == Some(id) {
                role.parent_id = removed.parent_id;
                role.updated_at = updated_at;
            }
        }
        for roles in inner.user_roles.values_mut() {
            roles.remove(&id);
        }
        let subject = id.to_string();
        inner
            .grants
            .retain(|g| !(g.subject_type == SubjectType::Role && g.subject_id == subject));
        Ok(())
    }

    async fn list_user_role_ids(&self, user_id: &str) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .inner
            .lock()
            .user_roles
            .get(user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn assign_role_to_user(&self, user_id: &str, role_id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.roles.contains_key(&role_id) {
            return Err(StoreError::RoleNotFound(role_id));
        }
        inner
            .user_roles
            .entry(user_id.to_string())
            .or_default()
            .insert(role_id);
        Ok(())
    }

    async fn unassign_role_from_user(
        &self,
        user_id: &str,
        role_id: i64,
    ) -> Result<(), StoreError> {
        if let Some(roles) = self.inner.lock().user_roles.get_mut(user_id) {
            roles.remove(&role_id);
        }
        Ok(())
    }

    async fn list_grants(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
    ) -> Result<Vec<GrantRow>, StoreError> {
        Ok(self
            .inner
            .lock()
            .grants
            .iter()
            .filter(|g| g.subject_type == subject_type && g.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn list_role_grants(&self, role_ids: &[i64]) -> Result<Vec<GrantRow>, StoreError> {
        Ok(self
            .inner
            .lock()
            .grants
            .iter()
            .filter(|g| g.role_id().is_some_and(|id| role_ids.contains(&id)))
            .cloned()
            .collect())
    }

    async fn upsert_grant(&self, row: &GrantRow) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        match inner.grants.iter_mut().find(|g| g.same_rule(row)) {
            Some(existing) => {
                existing.effect = row.effect;
                existing.updated_at = row.updated_at;
            }
            None => inner.grants.push(row.clone()),
        }
        Ok(())
    }

    async fn revoke_grant(&self, row: &GrantRow) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let before = inner.grants.len();
        inner.grants.retain(|g| !g.same_rule(row));
        Ok(inner.grants.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perm::{Effect, RuleKind};

    fn row(subject_type: SubjectType, subject_id: &str, local: &str, effect: Effect) -> GrantRow {
        GrantRow {
            subject_type,
            subject_id: subject_id.to_string(),
            ns_key: "ns".to_string(),
            kind: RuleKind::Exact,
            local: local.to_string(),
            effect,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_effect() {
        let store = MemoryStore::new();
        store
            .upsert_grant(&row(SubjectType::User, "u1", "a", Effect::Allow))
            .await
            .unwrap();
        store
            .upsert_grant(&row(SubjectType::User, "u1", "a", Effect::Deny))
            .await
            .unwrap();
        let grants = store.list_grants(SubjectType::User, "u1").await.unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].effect, Effect::Deny);
    }

    #[tokio::test]
    async fn test_delete_role_cascades() {
        let store = MemoryStore::new();
        let role = store.create_role(None, 5, Some("mods")).await.unwrap();
        store.assign_role_to_user("u1", role).await.unwrap();
        store
            .upsert_grant(&row(SubjectType::Role, &role.to_string(), "a", Effect::Allow))
            .await
            .unwrap();
        assert_eq!(store.list_role_grants(&[role]).await.unwrap().len(), 1);

        store.delete_role(role).await.unwrap();
        assert!(store.list_user_role_ids("u1").await.unwrap().is_empty());
        assert_eq!(store.grant_count(), 0);
        assert!(matches!(
            store.delete_role(role).await,
            Err(StoreError::RoleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_role_moves_children_up() {
        let store = MemoryStore::new();
        let top = store.create_role(None, 0, Some("top")).await.unwrap();
        let mid = store.create_role(Some(top), 0, Some("mid")).await.unwrap();
        let leaf = store.create_role(Some(mid), 0, Some("leaf")).await.unwrap();

        store.delete_role(mid).await.unwrap();
        let roles = store.list_roles().await.unwrap();
        assert_eq!(roles.len(), 2);
        let leaf = roles.iter().find(|r| r.id == leaf).unwrap();
        assert_eq!(leaf.parent_id, Some(top));

        store.delete_role(top).await.unwrap();
        let roles = store.list_roles().await.unwrap();
        assert_eq!(roles[0].parent_id, None);
    }

    #[tokio::test]
    async fn test_revoke_reports_presence() {
        let store = MemoryStore::new();
        let r = row(SubjectType::User, "u1", "a", Effect::Allow);
        assert!(!store.revoke_grant(&r).await.unwrap());
        store.upsert_grant(&r).await.unwrap();
        assert!(store.revoke_grant(&r).await.unwrap());
    }
}
