//! SQLite grant store.
//!
//! Async access through an SQLx pool with embedded migrations. `:memory:`
//! gets its own in-memory database held on a single connection that is
//! never recycled, so the data lives as long as the store. File databases
//! run in WAL mode with foreign keys on.

use super::{GrantRow, GrantStore, Role, RolePatch, StoreError};
use crate::perm::SubjectType;
use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

type GrantTuple = (String, String, String, String, String, String, i64);

/// [`GrantStore`] backed by SQLite.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
    const MAX_FILE_CONNECTIONS: u32 = 4;

    /// Open (or create) a database and run migrations. Missing parent
    /// directories of a file path are created.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let pool = if path == ":memory:" {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .foreign_keys(true);
            SqlitePoolOptions::new()
                .max_connections(Self::MAX_FILE_CONNECTIONS)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .connect_with(options)
                .await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(path = %path, "grant store opened");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn role_exists(&self, id: i64) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM roles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn grant_from_tuple(t: GrantTuple) -> Result<GrantRow, StoreError> {
    let (subject_type, subject_id, ns_key, kind, local, effect, updated_at) = t;
    Ok(GrantRow {
        subject_type: subject_type.parse().map_err(StoreError::CorruptRow)?,
        subject_id,
        ns_key,
        kind: kind.parse().map_err(StoreError::CorruptRow)?,
        local,
        effect: effect.parse().map_err(StoreError::CorruptRow)?,
        updated_at,
    })
}

#[async_trait]
impl GrantStore for SqliteStore {
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, Option<String>, Option<i64>, i64, i64)>(
            "SELECT id, name, parent_id, role_rank, updated_at FROM roles ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, parent_id, rank, updated_at)| Role {
                id,
                name,
                parent_id,
                rank,
                updated_at,
            })
            .collect())
    }

    async fn create_role(
        &self,
        parent_id: Option<i64>,
        rank: i64,
        name: Option<&str>,
    ) -> Result<i64, StoreError> {
        if let Some(parent) = parent_id
            && !self.role_exists(parent).await?
        {
            return Err(StoreError::RoleNotFound(parent));
        }

        let result = sqlx::query(
            "INSERT INTO roles (name, parent_id, role_rank, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(parent_id)
        .bind(rank)
        .bind(now())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn update_role(&self, id: i64, patch: &RolePatch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, (Option<String>, Option<i64>, i64)>(
            "SELECT name, parent_id, role_rank FROM roles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::RoleNotFound(id))?;

        let name = patch.name.clone().unwrap_or(current.0);
        let parent_id = patch.parent_id.unwrap_or(current.1);
        let rank = patch.rank.unwrap_or(current.2);

        sqlx::query(
            "UPDATE roles SET name = ?, parent_id = ?, role_rank = ?, updated_at = ? WHERE id = ?",
        )
        .bind(name)
        .bind(parent_id)
        .bind(rank)
        .bind(now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_role(&self, id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let parent_id: Option<Option<i64>> =
            sqlx::query_scalar("SELECT parent_id FROM roles WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(parent_id) = parent_id else {
            tx.rollback().await?;
            return Err(StoreError::RoleNotFound(id));
        };

        sqlx::query("UPDATE roles SET parent_id = ?, updated_at = ? WHERE parent_id = ?")
            .bind(parent_id)
            .bind(now())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM grants WHERE subject_type = 'role' AND subject_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM user_roles WHERE role_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_user_role_ids(&self, user_id: &str) -> Result<Vec<i64>, StoreError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT role_id FROM user_roles WHERE user_id = ? ORDER BY role_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn assign_role_to_user(&self, user_id: &str, role_id: i64) -> Result<(), StoreError> {
        if !self.role_exists(role_id).await? {
            return Err(StoreError::RoleNotFound(role_id));
        }
        sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn unassign_role_from_user(
        &self,
        user_id: &str,
        role_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role_id = ?")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_grants(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
    ) -> Result<Vec<GrantRow>, StoreError> {
        let rows = sqlx::query_as::<_, GrantTuple>(
            r#"
            SELECT subject_type, subject_id, ns_key, kind, local, effect, updated_at
            FROM grants
            WHERE subject_type = ? AND subject_id = ?
            "#,
        )
        .bind(subject_type.as_str())
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(grant_from_tuple).collect()
    }

    async fn list_role_grants(&self, role_ids: &[i64]) -> Result<Vec<GrantRow>, StoreError> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = sqlx::QueryBuilder::new(
            "SELECT subject_type, subject_id, ns_key, kind, local, effect, updated_at \
             FROM grants WHERE subject_type = 'role' AND subject_id IN (",
        );
        let mut ids = query.separated(", ");
        for id in role_ids {
            ids.push_bind(id.to_string());
        }
        ids.push_unseparated(")");

        let rows = query
            .build_query_as::<GrantTuple>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(grant_from_tuple).collect()
    }

    async fn upsert_grant(&self, row: &GrantRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO grants (subject_type, subject_id, ns_key, kind, local, effect, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (subject_type, subject_id, ns_key, kind, local)
            DO UPDATE SET effect = excluded.effect, updated_at = excluded.updated_at
            "#,
        )
        .bind(row.subject_type.as_str())
        .bind(&row.subject_id)
        .bind(&row.ns_key)
        .bind(row.kind.as_str())
        .bind(&row.local)
        .bind(row.effect.as_str())
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_grant(&self, row: &GrantRow) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM grants
            WHERE subject_type = ? AND subject_id = ? AND ns_key = ? AND kind = ? AND local = ?
            "#,
        )
        .bind(row.subject_type.as_str())
        .bind(&row.subject_id)
        .bind(&row.ns_key)
        .bind(row.kind.as_str())
        .bind(&row.local)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
