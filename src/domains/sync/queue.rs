use crate::domains::core::clock::Clock;
use crate::domains::sync::types::{
    EntityType, QueueStatus, SyncItem, SyncItemRow, SyncItemStatus, SyncPriority,
};
use crate::errors::{DbError, DomainError, DomainResult};
use crate::utils::to_db_timestamp;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as, query_scalar, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Durable queue of entities awaiting remote acknowledgment.
///
/// At most one non-synced item exists per (entity type, entity id).
#[async_trait]
pub trait SyncQueueRepository: Send + Sync {
    /// Queue an entity. If it is already outstanding the existing item keeps
    /// its retry count, takes the higher of the two priorities, and a Failed
    /// item goes back to Pending.
    async fn enqueue(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        priority: SyncPriority,
    ) -> DomainResult<SyncItem>;

    async fn find_by_id(&self, id: Uuid) -> DomainResult<SyncItem>;

    async fn find_outstanding(&self, entity_type: EntityType, entity_id: &str) -> DomainResult<Option<SyncItem>>;

    /// Pending items of one type, never-attempted and oldest-attempt first.
    async fn next_batch(&self, entity_type: EntityType, limit: u32) -> DomainResult<Vec<SyncItem>>;

    async fn mark_in_progress(&self, id: Uuid) -> DomainResult<()>;

    async fn mark_synced(&self, id: Uuid) -> DomainResult<()>;

    /// Count a failed attempt. The item returns to Pending, or becomes Failed
    /// once `retry_cap` attempts have failed.
    async fn record_failure(&self, id: Uuid, error: &str, retry_cap: u32) -> DomainResult<SyncItem>;

    /// Count a failed attempt the remote will never accept; the item becomes Failed.
    async fn mark_rejected(&self, id: Uuid, error: &str) -> DomainResult<SyncItem>;

    /// Put an item back to Pending without counting an attempt.
    async fn revert_to_pending(&self, id: Uuid) -> DomainResult<()>;

    /// Crash recovery: every InProgress item goes back to Pending.
    async fn reset_in_progress(&self) -> DomainResult<u64>;

    /// Move Failed items back to Pending, keeping their retry counts.
    async fn requeue_failed(&self, entity_type: Option<EntityType>) -> DomainResult<u64>;

    /// Items not yet synced, Failed ones included.
    async fn outstanding_count(&self) -> DomainResult<u64>;

    async fn status(&self) -> DomainResult<QueueStatus>;

    /// Drop Synced items last touched before `cutoff`.
    async fn cleanup_synced(&self, cutoff: DateTime<Utc>) -> DomainResult<u64>;
}

pub struct SqliteSyncQueueRepository {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteSyncQueueRepository {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    fn now(&self) -> String {
        to_db_timestamp(&self.clock.now())
    }

    fn not_found(id: Uuid) -> DomainError {
        DomainError::EntityNotFound("SyncItem".to_string(), id.to_string())
    }

    async fn set_status(&self, id: Uuid, status: SyncItemStatus, stamp_attempt: bool) -> DomainResult<()> {
        let now = self.now();
        let result = query(
            r#"
            UPDATE sync_queue SET
                status = ?,
                last_attempt_at = CASE WHEN ? THEN ? ELSE last_attempt_at END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(stamp_attempt)
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }
}

#[async_trait]
impl SyncQueueRepository for SqliteSyncQueueRepository {
    async fn enqueue(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        priority: SyncPriority,
    ) -> DomainResult<SyncItem> {
        let now = self.now();
        query(
            r#"
            INSERT INTO sync_queue (id, entity_type, entity_id, priority, retry_count, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, 'pending', ?, ?)
            ON CONFLICT(entity_type, entity_id) WHERE status <> 'synced' DO UPDATE SET
                priority = MIN(sync_queue.priority, excluded.priority),
                status = CASE WHEN sync_queue.status = 'failed' THEN 'pending' ELSE sync_queue.status END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(entity_type.as_str())
        .bind(entity_id)
        .bind(priority.as_i64())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        self.find_outstanding(entity_type, entity_id)
            .await?
            .ok_or_else(|| DomainError::Internal(format!(
                "Queued item for {} {} vanished", entity_type, entity_id
            )))
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<SyncItem> {
        query_as::<_, SyncItemRow>("SELECT * FROM sync_queue WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| Self::not_found(id))?
            .into_entity()
    }

    async fn find_outstanding(&self, entity_type: EntityType, entity_id: &str) -> DomainResult<Option<SyncItem>> {
        query_as::<_, SyncItemRow>(
            "SELECT * FROM sync_queue WHERE entity_type = ? AND entity_id = ? AND status <> 'synced'",
        )
        .bind(entity_type.as_str())
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?
        .map(SyncItemRow::into_entity)
        .transpose()
    }

    async fn next_batch(&self, entity_type: EntityType, limit: u32) -> DomainResult<Vec<SyncItem>> {
        let rows = query_as::<_, SyncItemRow>(
            r#"
            SELECT * FROM sync_queue
            WHERE entity_type = ? AND status = 'pending'
            ORDER BY last_attempt_at IS NOT NULL, last_attempt_at ASC, priority ASC, created_at ASC
            LIMIT ?
            "#,
        )
        .bind(entity_type.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        rows.into_iter().map(SyncItemRow::into_entity).collect()
    }

    async fn mark_in_progress(&self, id: Uuid) -> DomainResult<()> {
        self.set_status(id, SyncItemStatus::InProgress, true).await
    }

    async fn mark_synced(&self, id: Uuid) -> DomainResult<()> {
        query("UPDATE sync_queue SET error_message = NULL WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;
        self.set_status(id, SyncItemStatus::Synced, false).await
    }

    async fn record_failure(&self, id: Uuid, error: &str, retry_cap: u32) -> DomainResult<SyncItem> {
        let now = self.now();
        let result = query(
            r#"
            UPDATE sync_queue SET
                retry_count = retry_count + 1,
                error_message = ?,
                status = CASE WHEN retry_count + 1 >= ? THEN 'failed' ELSE 'pending' END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(retry_cap as i64)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }

        let item = self.find_by_id(id).await?;
        if item.status == SyncItemStatus::Failed {
            log::error!(
                "Sync of {} {} gave up after {} attempts: {}",
                item.entity_type, item.entity_id, item.retry_count, error
            );
        }
        Ok(item)
    }

    async fn mark_rejected(&self, id: Uuid, error: &str) -> DomainResult<SyncItem> {
        let now = self.now();
        let result = query(
            r#"
            UPDATE sync_queue SET
                retry_count = retry_count + 1,
                error_message = ?,
                status = 'failed',
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }

        let item = self.find_by_id(id).await?;
        log::error!("Remote rejected {} {}: {}", item.entity_type, item.entity_id, error);
        Ok(item)
    }

    async fn revert_to_pending(&self, id: Uuid) -> DomainResult<()> {
        self.set_status(id, SyncItemStatus::Pending, false).await
    }

    async fn reset_in_progress(&self) -> DomainResult<u64> {
        let result = query("UPDATE sync_queue SET status = 'pending', updated_at = ? WHERE status = 'in_progress'")
            .bind(self.now())
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() > 0 {
            log::warn!("Recovered {} interrupted sync items", result.rows_affected());
        }
        Ok(result.rows_affected())
    }

    async fn requeue_failed(&self, entity_type: Option<EntityType>) -> DomainResult<u64> {
        let result = query(
            r#"
            UPDATE sync_queue SET status = 'pending', updated_at = ?
            WHERE status = 'failed' AND (? IS NULL OR entity_type = ?)
            "#,
        )
        .bind(self.now())
        .bind(entity_type.map(|t| t.as_str()))
        .bind(entity_type.map(|t| t.as_str()))
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        log::info!("Requeued {} failed sync items", result.rows_affected());
        Ok(result.rows_affected())
    }

    async fn outstanding_count(&self) -> DomainResult<u64> {
        let count: i64 = query_scalar("SELECT COUNT(*) FROM sync_queue WHERE status <> 'synced'")
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(count as u64)
    }

    async fn status(&self) -> DomainResult<QueueStatus> {
        let rows: Vec<(String, String, i64)> = query_as(
            "SELECT entity_type, status, COUNT(*) FROM sync_queue GROUP BY entity_type, status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        let mut status = QueueStatus::default();
        for (entity_type, item_status, count) in rows {
            status
                .counts
                .entry(EntityType::from_str(&entity_type)?)
                .or_default()
                .insert(SyncItemStatus::from_str(&item_status)?, count as u64);
        }
        Ok(status)
    }

    async fn cleanup_synced(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        let result = query("DELETE FROM sync_queue WHERE status = 'synced' AND updated_at < ?")
            .bind(to_db_timestamp(&cutoff))
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(result.rows_affected())
    }
}
