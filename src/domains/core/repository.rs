use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as, query_scalar, FromRow, SqlitePool};
use uuid::Uuid;

use crate::domains::core::syncable::{EntityPayload, SyncRecord};
use crate::errors::{DbError, DomainError, DomainResult, ValidationError};
use crate::utils::{parse_db_timestamp, to_db_timestamp};

/// Trait for finding entities by ID
#[async_trait]
pub trait FindById<T> {
    /// Find an entity by ID
    async fn find_by_id(&self, id: Uuid) -> DomainResult<T>;
}

/// Durable storage for one kind of syncable field record.
#[async_trait]
pub trait SyncableRepository<P: EntityPayload>: FindById<SyncRecord<P>> + Send + Sync {
    /// Insert a new record, or apply a local edit to an existing one.
    ///
    /// A local edit replaces the payload, bumps `version` and clears
    /// `is_synced`; `remote_id` is never touched here.
    async fn save(&self, record: &SyncRecord<P>) -> DomainResult<SyncRecord<P>>;

    /// Records not yet acknowledged by the remote, oldest first.
    async fn get_pending(&self, limit: u32) -> DomainResult<Vec<SyncRecord<P>>>;

    async fn count_pending(&self) -> DomainResult<u64>;

    /// Record the remote's acknowledgment of `acked_version`. An existing
    /// `remote_id` is kept. A record edited after that version was sent stays unsynced.
    async fn update_sync_status(
        &self,
        local_id: Uuid,
        remote_id: &str,
        acked_version: i64,
    ) -> DomainResult<()>;

    /// Replace local state with the authoritative remote copy.
    async fn adopt_remote(
        &self,
        local_id: Uuid,
        remote_id: &str,
        remote_version: i64,
        remote_last_modified: DateTime<Utc>,
        payload: &P,
    ) -> DomainResult<SyncRecord<P>>;

    /// Synced records whose timestamp is before `cutoff`.
    async fn find_synced_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<SyncRecord<P>>>;

    /// Purge synced records whose timestamp is before `cutoff`. Unsynced
    /// records are never purged regardless of age.
    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64>;
}

#[derive(Debug, FromRow)]
struct SyncRecordRow {
    local_id: String,
    remote_id: Option<String>,
    is_synced: i64,
    timestamp: String,
    last_modified: String,
    version: i64,
    payload: String,
}

impl SyncRecordRow {
    fn into_record<P: EntityPayload>(self) -> DomainResult<SyncRecord<P>> {
        let local_id = Uuid::parse_str(&self.local_id)
            .map_err(|_| DomainError::Validation(ValidationError::format("local_id", "must be a UUID")))?;
        let payload: P = serde_json::from_str(&self.payload)
            .map_err(|e| DomainError::Internal(format!(
                "Corrupt payload for {} {}: {}", P::ENTITY_TYPE.as_str(), self.local_id, e
            )))?;

        Ok(SyncRecord {
            local_id,
            remote_id: self.remote_id,
            is_synced: self.is_synced != 0,
            timestamp: parse_db_timestamp("timestamp", &self.timestamp)?,
            last_modified: parse_db_timestamp("last_modified", &self.last_modified)?,
            version: self.version,
            payload,
        })
    }
}

/// SQLite implementation shared by every syncable record type.
/// Each type lives in its own table; domain fields are kept as JSON.
pub struct SqliteSyncableRepository<P> {
    pool: SqlitePool,
    _payload: PhantomData<fn() -> P>,
}

impl<P: EntityPayload> SqliteSyncableRepository<P> {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, _payload: PhantomData }
    }

    fn table() -> &'static str {
        P::ENTITY_TYPE.table_name()
    }

    fn encode_payload(payload: &P) -> DomainResult<String> {
        serde_json::to_string(payload)
            .map_err(|e| DomainError::Internal(format!("Failed to encode payload: {}", e)))
    }

    fn not_found(local_id: Uuid) -> DomainError {
        DomainError::EntityNotFound(P::ENTITY_TYPE.as_str().to_string(), local_id.to_string())
    }
}

#[async_trait]
impl<P: EntityPayload> FindById<SyncRecord<P>> for SqliteSyncableRepository<P> {
    async fn find_by_id(&self, id: Uuid) -> DomainResult<SyncRecord<P>> {
        let sql = format!("SELECT * FROM {} WHERE local_id = ?", Self::table());
        let row = query_as::<_, SyncRecordRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| Self::not_found(id))?;

        row.into_record()
    }
}

#[async_trait]
impl<P: EntityPayload> SyncableRepository<P> for SqliteSyncableRepository<P> {
    async fn save(&self, record: &SyncRecord<P>) -> DomainResult<SyncRecord<P>> {
        let table = Self::table();
        let sql = format!(
            r#"
            INSERT INTO {table} (local_id, remote_id, is_synced, timestamp, last_modified, version, payload)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(local_id) DO UPDATE SET
                payload = excluded.payload,
                last_modified = excluded.last_modified,
                version = {table}.version + 1,
                is_synced = 0
            "#
        );

        query(&sql)
            .bind(record.local_id.to_string())
            .bind(&record.remote_id)
            .bind(record.is_synced as i64)
            .bind(to_db_timestamp(&record.timestamp))
            .bind(to_db_timestamp(&record.last_modified))
            .bind(record.version)
            .bind(Self::encode_payload(&record.payload)?)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        self.find_by_id(record.local_id).await
    }

    async fn get_pending(&self, limit: u32) -> DomainResult<Vec<SyncRecord<P>>> {
        let sql = format!(
            "SELECT * FROM {} WHERE is_synced = 0 ORDER BY timestamp ASC LIMIT ?",
            Self::table()
        );
        let rows = query_as::<_, SyncRecordRow>(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;

        rows.into_iter().map(SyncRecordRow::into_record).collect()
    }

    async fn count_pending(&self) -> DomainResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE is_synced = 0", Self::table());
        let count: i64 = query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(count as u64)
    }

    async fn update_sync_status(
        &self,
        local_id: Uuid,
        remote_id: &str,
        acked_version: i64,
    ) -> DomainResult<()> {
        let sql = format!(
            r#"
            UPDATE {} SET
                is_synced = CASE WHEN version <= ? THEN 1 ELSE 0 END,
                remote_id = COALESCE(remote_id, ?),
                version = MAX(version, ?)
            WHERE local_id = ?
            "#,
            Self::table()
        );
        let result = query(&sql)
            .bind(acked_version)
            .bind(remote_id)
            .bind(acked_version)
            .bind(local_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(local_id));
        }
        Ok(())
    }

    async fn adopt_remote(
        &self,
        local_id: Uuid,
        remote_id: &str,
        remote_version: i64,
        remote_last_modified: DateTime<Utc>,
        payload: &P,
    ) -> DomainResult<SyncRecord<P>> {
        let sql = format!(
            r#"
            UPDATE {} SET
                payload = ?,
                version = ?,
                last_modified = ?,
                is_synced = 1,
                remote_id = COALESCE(remote_id, ?)
            WHERE local_id = ?
            "#,
            Self::table()
        );
        let result = query(&sql)
            .bind(Self::encode_payload(payload)?)
            .bind(remote_version)
            .bind(to_db_timestamp(&remote_last_modified))
            .bind(remote_id)
            .bind(local_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(local_id));
        }
        self.find_by_id(local_id).await
    }

    async fn find_synced_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<SyncRecord<P>>> {
        let sql = format!(
            "SELECT * FROM {} WHERE is_synced = 1 AND timestamp < ? ORDER BY timestamp ASC",
            Self::table()
        );
        let rows = query_as::<_, SyncRecordRow>(&sql)
            .bind(to_db_timestamp(&cutoff))
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;

        rows.into_iter().map(SyncRecordRow::into_record).collect()
    }

    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        let sql = format!("DELETE FROM {} WHERE is_synced = 1 AND timestamp < ?", Self::table());
        let result = query(&sql)
            .bind(to_db_timestamp(&cutoff))
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::records::types::Report;
    use crate::test_support::memory_pool;
    use chrono::{Duration, TimeZone};

    fn report(title: &str) -> Report {
        Report {
            user_id: "user-1".to_string(),
            location_id: "site-1".to_string(),
            title: title.to_string(),
            body: "All quiet".to_string(),
            severity: crate::domains::records::types::ReportSeverity::Info,
        }
    }

    #[tokio::test]
    async fn test_save_then_edit_bumps_version_and_clears_sync() {
        let repo = SqliteSyncableRepository::<Report>::new(memory_pool().await);
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let saved = repo.save(&SyncRecord::new(report("Gate"), now)).await.unwrap();
        assert_eq!(saved.version, 1);
        assert!(!saved.is_synced);

        repo.update_sync_status(saved.local_id, "srv-1", 1).await.unwrap();

        let mut edited = saved.clone();
        edited.payload.title = "Gate B".to_string();
        edited.last_modified = now + Duration::minutes(5);
        let edited = repo.save(&edited).await.unwrap();
        assert_eq!(edited.version, 2);
        assert!(!edited.is_synced);
        assert_eq!(edited.remote_id.as_deref(), Some("srv-1"));
        assert_eq!(edited.payload.title, "Gate B");
    }

    #[tokio::test]
    async fn test_remote_id_is_assigned_once() {
        let repo = SqliteSyncableRepository::<Report>::new(memory_pool().await);
        let saved = repo.save(&SyncRecord::new(report("Lobby"), Utc::now())).await.unwrap();

        repo.update_sync_status(saved.local_id, "srv-1", 1).await.unwrap();
        repo.update_sync_status(saved.local_id, "srv-2", 1).await.unwrap();

        let found = repo.find_by_id(saved.local_id).await.unwrap();
        assert!(found.is_synced);
        assert_eq!(found.remote_id.as_deref(), Some("srv-1"));
    }

    #[tokio::test]
    async fn test_pending_and_cleanup_respect_sync_flag() {
        let repo = SqliteSyncableRepository::<Report>::new(memory_pool().await);
        let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let synced = repo.save(&SyncRecord::new(report("Old synced"), old)).await.unwrap();
        let unsynced = repo.save(&SyncRecord::new(report("Old unsynced"), old)).await.unwrap();
        repo.update_sync_status(synced.local_id, "srv-9", 1).await.unwrap();

        assert_eq!(repo.count_pending().await.unwrap(), 1);
        let pending = repo.get_pending(10).await.unwrap();
        assert_eq!(pending[0].local_id, unsynced.local_id);

        let cutoff = old + Duration::days(1);
        assert_eq!(repo.find_synced_older_than(cutoff).await.unwrap().len(), 1);
        assert_eq!(repo.cleanup_older_than(cutoff).await.unwrap(), 1);
        assert!(repo.find_by_id(synced.local_id).await.is_err());
        assert!(repo.find_by_id(unsynced.local_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_adopt_remote_replaces_payload() {
        let repo = SqliteSyncableRepository::<Report>::new(memory_pool().await);
        let saved = repo.save(&SyncRecord::new(report("Local"), Utc::now())).await.unwrap();
        let remote_modified = Utc::now() + Duration::hours(1);

        let adopted = repo
            .adopt_remote(saved.local_id, "srv-3", 7, remote_modified, &report("Remote"))
            .await
            .unwrap();

        assert_eq!(adopted.payload.title, "Remote");
        assert_eq!(adopted.version, 7);
        assert!(adopted.is_synced);
        assert_eq!(adopted.remote_id.as_deref(), Some("srv-3"));
        assert_eq!(adopted.last_modified, crate::utils::parse_db_timestamp(
            "t", &to_db_timestamp(&remote_modified)).unwrap());
    }

    #[tokio::test]
    async fn test_ack_of_stale_version_keeps_record_pending() {
        let repo = SqliteSyncableRepository::<Report>::new(memory_pool().await);
        let saved = repo.save(&SyncRecord::new(report("v1"), Utc::now())).await.unwrap();
        let mut edited = saved.clone();
        edited.payload.title = "v2".to_string();
        repo.save(&edited).await.unwrap();

        repo.update_sync_status(saved.local_id, "srv-5", 1).await.unwrap();
        let found = repo.find_by_id(saved.local_id).await.unwrap();
        assert!(!found.is_synced);
        assert_eq!(found.version, 2);
        assert_eq!(found.remote_id.as_deref(), Some("srv-5"));
    }

    #[tokio::test]
    async fn test_missing_record() {
        let repo = SqliteSyncableRepository::<Report>::new(memory_pool().await);
        let err = repo.update_sync_status(Uuid::new_v4(), "srv", 1).await.unwrap_err();
        assert!(matches!(err, DomainError::EntityNotFound(_, _)));
    }
}
