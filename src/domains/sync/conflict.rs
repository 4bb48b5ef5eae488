use crate::domains::core::clock::Clock;
use crate::domains::core::repository::SyncableRepository;
use crate::domains::core::syncable::{EntityPayload, SyncRecord};
use crate::errors::{DbError, DomainResult, RemoteResult, SyncError};
use crate::utils::to_db_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{query, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

/// How a conflict was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictStrategy {
    RemoteWins,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::RemoteWins => "remote_wins",
        }
    }
}

/// The authoritative copy carried by a conflict response
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteVersion {
    pub remote_id: String,
    pub version: i64,
    pub last_modified: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Settles push conflicts. The remote copy always replaces local state
/// wholesale; every resolution is logged and written to `sync_conflicts`.
pub struct ConflictResolver {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl ConflictResolver {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        ConflictStrategy::RemoteWins
    }

    pub async fn resolve<P: EntityPayload>(
        &self,
        repo: &dyn SyncableRepository<P>,
        local: &SyncRecord<P>,
        remote: RemoteVersion,
    ) -> RemoteResult<SyncRecord<P>> {
        let remote_payload: P = serde_json::from_value(remote.payload.clone())
            .map_err(|e| SyncError::Decode(format!(
                "conflict payload for {} {}: {}", P::ENTITY_TYPE, local.local_id, e
            )))?;

        log::warn!(
            "Conflict on {} {}: local v{} discarded for remote v{} ({})",
            P::ENTITY_TYPE,
            local.local_id,
            local.version,
            remote.version,
            self.strategy().as_str()
        );

        self.record_audit(local, &remote).await?;

        let adopted = repo
            .adopt_remote(
                local.local_id,
                &remote.remote_id,
                remote.version,
                remote.last_modified,
                &remote_payload,
            )
            .await?;
        Ok(adopted)
    }

    async fn record_audit<P: EntityPayload>(
        &self,
        local: &SyncRecord<P>,
        remote: &RemoteVersion,
    ) -> DomainResult<()> {
        let local_payload = serde_json::to_string(&local.payload)
            .map_err(|e| crate::errors::DomainError::Internal(e.to_string()))?;

        query(
            r#"
            INSERT INTO sync_conflicts
                (id, entity_type, entity_id, local_version, remote_version, local_payload, remote_payload, strategy, resolved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(P::ENTITY_TYPE.as_str())
        .bind(local.local_id.to_string())
        .bind(local.version)
        .bind(remote.version)
        .bind(local_payload)
        .bind(remote.payload.to_string())
        .bind(self.strategy().as_str())
        .bind(to_db_timestamp(&self.clock.now()))
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::core::clock::SystemClock;
    use crate::domains::core::repository::{FindById, SqliteSyncableRepository};
    use crate::domains::records::types::{Report, ReportSeverity};
    use crate::test_support::memory_pool;

    fn report(title: &str) -> Report {
        Report {
            user_id: "u1".into(),
            location_id: "site-1".into(),
            title: title.into(),
            body: String::new(),
            severity: ReportSeverity::Info,
        }
    }

    #[tokio::test]
    async fn test_remote_wins_and_is_audited() {
        let pool = memory_pool().await;
        let repo = SqliteSyncableRepository::<Report>::new(pool.clone());
        let resolver = ConflictResolver::new(pool.clone(), Arc::new(SystemClock));
        let local = repo.save(&SyncRecord::new(report("local edit"), Utc::now())).await.unwrap();

        let remote = RemoteVersion {
            remote_id: "srv-7".into(),
            version: 4,
            last_modified: Utc::now(),
            payload: serde_json::to_value(report("server copy")).unwrap(),
        };
        let adopted = resolver.resolve(&repo, &local, remote).await.unwrap();

        assert_eq!(adopted.payload.title, "server copy");
        assert_eq!(adopted.version, 4);
        assert!(adopted.is_synced);
        assert_eq!(repo.find_by_id(local.local_id).await.unwrap(), adopted);

        let audited: (String, i64, i64) = sqlx::query_as(
            "SELECT strategy, local_version, remote_version FROM sync_conflicts WHERE entity_id = ?",
        )
        .bind(local.local_id.to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(audited, ("remote_wins".to_string(), 1, 4));
    }

    #[tokio::test]
    async fn test_undecodable_remote_payload_leaves_local_untouched() {
        let pool = memory_pool().await;
        let repo = SqliteSyncableRepository::<Report>::new(pool.clone());
        let resolver = ConflictResolver::new(pool, Arc::new(SystemClock));
        let local = repo.save(&SyncRecord::new(report("mine"), Utc::now())).await.unwrap();

        let remote = RemoteVersion {
            remote_id: "srv-7".into(),
            version: 2,
            last_modified: Utc::now(),
            payload: serde_json::json!({"unexpected": true}),
        };
        let err = resolver.resolve(&repo, &local, remote).await.unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));
        assert!(!repo.find_by_id(local.local_id).await.unwrap().is_synced);
    }
}
