use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::{
    error::AppResult,
    models::{NewUser, UserEntity},
};

/// Storage capability the pipeline and the sweeper depend on.
///
/// `find_by_external_id` reports a missing row as `Ok(None)`; any `Err` is a
/// store failure. `create` must be safe to race for the same external
/// identifier: implementations collapse concurrent creates into one row and
/// let the latest online flag win.
///
/// Neither `create` nor `update` ever moves an existing `last_seen`
/// backwards, so a write built from a stale read cannot undo a newer online
/// stamp.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn init(&self) -> AppResult<()>;
    async fn ping(&self) -> AppResult<()>;
    async fn find_by_external_id(&self, external_id: i64) -> AppResult<Option<UserEntity>>;
    async fn create(&self, user: NewUser) -> AppResult<UserEntity>;
    /// Writes `online` for the row keyed by `user.id` and advances
    /// `last_seen` to `user.last_seen` if that is newer. Returns `None` when
    /// the row no longer exists.
    async fn update(&self, user: &UserEntity) -> AppResult<Option<UserEntity>>;
    /// Deletes every row whose `COALESCE(last_seen, created_at)` is older
    /// than `cutoff` and returns how many went.
    async fn delete_seen_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn init(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_by_external_id(&self, external_id: i64) -> AppResult<Option<UserEntity>> {
        let user = sqlx::query_as::<_, UserEntity>(
            r#"
            SELECT id, external_id, online, last_seen, created_at
            FROM users
            WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create(&self, user: NewUser) -> AppResult<UserEntity> {
        let created = sqlx::query_as::<_, UserEntity>(
            r#"
            INSERT INTO users (external_id, online, last_seen)
            VALUES ($1, $2, $3)
            ON CONFLICT (external_id) DO UPDATE
            SET online = EXCLUDED.online,
                last_seen = GREATEST(users.last_seen, EXCLUDED.last_seen)
            RETURNING id, external_id, online, last_seen, created_at
            "#,
        )
        .bind(user.external_id)
        .bind(user.online)
        .bind(user.last_seen)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn update(&self, user: &UserEntity) -> AppResult<Option<UserEntity>> {
        let updated = sqlx::query_as::<_, UserEntity>(
            r#"
            UPDATE users
            SET online = $2, last_seen = GREATEST(last_seen, $3)
            WHERE id = $1
            RETURNING id, external_id, online, last_seen, created_at
            "#,
        )
        .bind(user.id)
        .bind(user.online)
        .bind(user.last_seen)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }

    async fn delete_seen_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM users WHERE COALESCE(last_seen, created_at) < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[derive(Debug, Default)]
struct MemoryTable {
    rows: HashMap<i64, UserEntity>,
    by_external_id: HashMap<i64, i64>,
    next_id: i64,
}

/// Map-backed store for tests and the `memory` backend.
#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    table: RwLock<MemoryTable>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn init(&self) -> AppResult<()> {
        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn find_by_external_id(&self, external_id: i64) -> AppResult<Option<UserEntity>> {
        let table = self.table.read().await;
        let user = table
            .by_external_id
            .get(&external_id)
            .and_then(|id| table.rows.get(id))
            .cloned();
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> AppResult<UserEntity> {
        let mut table = self.table.write().await;

        if let Some(id) = table.by_external_id.get(&user.external_id).copied()
            && let Some(existing) = table.rows.get_mut(&id)
        {
            existing.online = user.online;
            existing.last_seen = existing.last_seen.max(user.last_seen);
            return Ok(existing.clone());
        }

        table.next_id += 1;
        let created = UserEntity {
            id: table.next_id,
            external_id: user.external_id,
            online: user.online,
            last_seen: user.last_seen,
            created_at: Utc::now(),
        };
        table.by_external_id.insert(created.external_id, created.id);
        table.rows.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(&self, user: &UserEntity) -> AppResult<Option<UserEntity>> {
        let mut table = self.table.write().await;
        let Some(existing) = table.rows.get_mut(&user.id) else {
            return Ok(None);
        };

        existing.online = user.online;
        existing.last_seen = existing.last_seen.max(user.last_seen);
        Ok(Some(existing.clone()))
    }

    async fn delete_seen_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let mut table = self.table.write().await;
        let stale = table
            .rows
            .values()
            .filter(|user| user.freshness() < cutoff)
            .map(|user| (user.id, user.external_id))
            .collect::<Vec<_>>();

        for (id, external_id) in &stale {
            table.rows.remove(id);
            table.by_external_id.remove(external_id);
        }

        Ok(stale.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn offline(external_id: i64) -> NewUser {
        NewUser {
            external_id,
            online: false,
            last_seen: None,
        }
    }

    #[tokio::test]
    async fn in_memory_repo_supports_basic_flow() {
        let repo = InMemoryUserRepository::new();
        repo.init().await.expect("init should succeed");

        let created = repo.create(offline(42)).await.expect("create should succeed");
        assert_eq!(created.external_id, 42);
        assert!(created.id > 0);

        let fetched = repo
            .find_by_external_id(42)
            .await
            .expect("lookup should succeed")
            .expect("user should exist");
        assert_eq!(fetched, created);

        let missing = repo
            .find_by_external_id(7)
            .await
            .expect("lookup should succeed");
        assert!(missing.is_none());

        let mut changed = fetched.clone();
        changed.online = true;
        changed.last_seen = Some(Utc::now());
        let updated = repo
            .update(&changed)
            .await
            .expect("update should succeed")
            .expect("row should exist");
        assert!(updated.online);
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
    }

    #[tokio::test]
    async fn create_collapses_onto_existing_external_id() {
        let repo = InMemoryUserRepository::new();
        let seen = Utc::now();

        let first = repo
            .create(NewUser {
                external_id: 5,
                online: true,
                last_seen: Some(seen),
            })
            .await
            .expect("create should succeed");
        let second = repo.create(offline(5)).await.expect("create should succeed");

        assert_eq!(first.id, second.id);
        assert!(!second.online);
        assert_eq!(second.last_seen, Some(seen));
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn update_of_vanished_row_reports_none() {
        let repo = InMemoryUserRepository::new();
        let created = repo.create(offline(9)).await.expect("create should succeed");

        let removed = repo
            .delete_seen_before(Utc::now() + TimeDelta::seconds(1))
            .await
            .expect("delete should succeed");
        assert_eq!(removed, 1);

        let updated = repo.update(&created).await.expect("update should succeed");
        assert!(updated.is_none());
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn update_never_moves_last_seen_backwards() {
        let repo = InMemoryUserRepository::new();
        let seen = Utc::now();
        let mut user = repo
            .create(NewUser {
                external_id: 4,
                online: true,
                last_seen: Some(seen),
            })
            .await
            .expect("create should succeed");

        user.online = false;
        user.last_seen = Some(seen - TimeDelta::minutes(10));
        let updated = repo
            .update(&user)
            .await
            .expect("update should succeed")
            .expect("row should exist");
        assert!(!updated.online);
        assert_eq!(updated.last_seen, Some(seen));

        user.last_seen = None;
        let updated = repo
            .update(&user)
            .await
            .expect("update should succeed")
            .expect("row should exist");
        assert_eq!(updated.last_seen, Some(seen));

        let merged = repo
            .create(NewUser {
                external_id: 4,
                online: true,
                last_seen: Some(seen - TimeDelta::minutes(5)),
            })
            .await
            .expect("create should succeed");
        assert!(merged.online);
        assert_eq!(merged.last_seen, Some(seen));
    }

    #[tokio::test]
    async fn delete_uses_last_seen_before_creation_time() {
        let repo = InMemoryUserRepository::new();
        repo.create(NewUser {
            external_id: 1,
            online: false,
            last_seen: Some(Utc::now() - TimeDelta::hours(2)),
        })
        .await
        .expect("create should succeed");
        let fresh = repo.create(offline(2)).await.expect("create should succeed");

        let removed = repo
            .delete_seen_before(Utc::now() - TimeDelta::hours(1))
            .await
            .expect("delete should succeed");

        assert_eq!(removed, 1);
        assert!(repo.find_by_external_id(1).await.unwrap().is_none());
        assert_eq!(
            repo.find_by_external_id(2).await.unwrap().map(|u| u.id),
            Some(fresh.id)
        );
    }
}
