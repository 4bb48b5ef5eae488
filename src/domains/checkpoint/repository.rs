use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};

use crate::domains::checkpoint::types::{Checkpoint, CheckpointRow};
use crate::errors::{DbError, DomainError, DomainResult};
use crate::utils::to_db_timestamp;
use crate::validation::Validate;

/// Read side of the checkpoint catalogue plus bulk refresh from the remote.
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn find_by_location(&self, location_id: &str) -> DomainResult<Vec<Checkpoint>>;

    async fn find_by_id(&self, id: &str) -> DomainResult<Checkpoint>;

    /// Insert or replace a downloaded list of checkpoints in one transaction.
    async fn upsert_many(&self, checkpoints: &[Checkpoint]) -> DomainResult<usize>;
}

pub struct SqliteCheckpointRepository {
    pool: SqlitePool,
}

impl SqliteCheckpointRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointRepository for SqliteCheckpointRepository {
    async fn find_by_location(&self, location_id: &str) -> DomainResult<Vec<Checkpoint>> {
        let rows = query_as::<_, CheckpointRow>(
            "SELECT * FROM checkpoints WHERE location_id = ? ORDER BY name, id",
        )
        .bind(location_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        rows.into_iter().map(CheckpointRow::into_entity).collect()
    }

    async fn find_by_id(&self, id: &str) -> DomainResult<Checkpoint> {
        query_as::<_, CheckpointRow>("SELECT * FROM checkpoints WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| DomainError::EntityNotFound("Checkpoint".to_string(), id.to_string()))?
            .into_entity()
    }

    async fn upsert_many(&self, checkpoints: &[Checkpoint]) -> DomainResult<usize> {
        for checkpoint in checkpoints {
            checkpoint.validate()?;
        }

        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        for checkpoint in checkpoints {
            query(
                r#"
                INSERT INTO checkpoints (id, location_id, name, latitude, longitude, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    location_id = excluded.location_id,
                    name = excluded.name,
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&checkpoint.id)
            .bind(&checkpoint.location_id)
            .bind(&checkpoint.name)
            .bind(checkpoint.latitude)
            .bind(checkpoint.longitude)
            .bind(to_db_timestamp(&checkpoint.updated_at))
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;
        }
        tx.commit().await.map_err(DbError::from)?;

        log::debug!("Upserted {} checkpoints", checkpoints.len());
        Ok(checkpoints.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_pool;
    use chrono::Utc;

    fn checkpoint(id: &str, location_id: &str) -> Checkpoint {
        Checkpoint {
            id: id.to_string(),
            location_id: location_id.to_string(),
            name: Some(format!("Checkpoint {}", id)),
            latitude: 40.0,
            longitude: -74.0,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_find() {
        let repo = SqliteCheckpointRepository::new(memory_pool().await);
        repo.upsert_many(&[checkpoint("a", "site-1"), checkpoint("b", "site-1"), checkpoint("c", "site-2")])
            .await
            .unwrap();

        assert_eq!(repo.find_by_location("site-1").await.unwrap().len(), 2);
        assert!(repo.find_by_location("site-9").await.unwrap().is_empty());

        let mut moved = checkpoint("a", "site-1");
        moved.latitude = 41.0;
        repo.upsert_many(&[moved]).await.unwrap();
        assert_eq!(repo.find_by_id("a").await.unwrap().latitude, 41.0);
    }

    #[tokio::test]
    async fn test_invalid_checkpoint_rejects_whole_batch() {
        let repo = SqliteCheckpointRepository::new(memory_pool().await);
        let mut bad = checkpoint("bad", "site-1");
        bad.latitude = 120.0;
        assert!(repo.upsert_many(&[checkpoint("ok", "site-1"), bad]).await.is_err());
        assert!(repo.find_by_id("ok").await.is_err());
    }
}
