use crate::domains::connectivity::OperationKind;
use crate::errors::{DomainError, DomainResult, ValidationError};
use crate::utils::parse_optional_db_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kinds of field record that are pushed to the remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    TimeRecord,
    CheckpointVerification,
    Report,
    Photo,
    LocationPoint,
}

impl EntityType {
    /// Order in which a full pass drains the queue.
    pub const SYNC_ORDER: [EntityType; 5] = [
        EntityType::TimeRecord,
        EntityType::CheckpointVerification,
        EntityType::Report,
        EntityType::Photo,
        EntityType::LocationPoint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::TimeRecord => "time_record",
            EntityType::CheckpointVerification => "checkpoint_verification",
            EntityType::Report => "report",
            EntityType::Photo => "photo",
            EntityType::LocationPoint => "location_point",
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            EntityType::TimeRecord => "time_records",
            EntityType::CheckpointVerification => "checkpoint_verifications",
            EntityType::Report => "reports",
            EntityType::Photo => "photos",
            EntityType::LocationPoint => "location_points",
        }
    }

    /// Remote path segment, also the circuit breaker key.
    pub fn endpoint(&self) -> &'static str {
        match self {
            EntityType::TimeRecord => "time-records",
            EntityType::CheckpointVerification => "checkpoint-verifications",
            EntityType::Report => "reports",
            EntityType::Photo => "photos",
            EntityType::LocationPoint => "location-points",
        }
    }

    pub fn priority(&self) -> SyncPriority {
        match self {
            EntityType::TimeRecord => SyncPriority::Critical,
            EntityType::CheckpointVerification => SyncPriority::High,
            EntityType::Report => SyncPriority::Normal,
            EntityType::Photo => SyncPriority::Low,
            EntityType::LocationPoint => SyncPriority::Background,
        }
    }

    pub fn operation_kind(&self) -> OperationKind {
        match self {
            EntityType::TimeRecord | EntityType::CheckpointVerification => OperationKind::Critical,
            EntityType::Photo => OperationKind::PhotoUpload,
            EntityType::Report | EntityType::LocationPoint => OperationKind::Standard,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time_record" => Ok(EntityType::TimeRecord),
            "checkpoint_verification" => Ok(EntityType::CheckpointVerification),
            "report" => Ok(EntityType::Report),
            "photo" => Ok(EntityType::Photo),
            "location_point" => Ok(EntityType::LocationPoint),
            _ => Err(DomainError::Validation(ValidationError::custom(
                &format!("Invalid EntityType string: {}", s)
            )))
        }
    }
}

/// Queue priority. Lower value drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SyncPriority {
    Critical = 1,
    High = 2,
    Normal = 3,
    Low = 4,
    Background = 5,
}

impl SyncPriority {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Lifecycle of a queued work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncItemStatus {
    Pending,
    InProgress,
    Synced,
    Failed,
}

impl SyncItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncItemStatus::Pending => "pending",
            SyncItemStatus::InProgress => "in_progress",
            SyncItemStatus::Synced => "synced",
            SyncItemStatus::Failed => "failed",
        }
    }
}

impl FromStr for SyncItemStatus {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncItemStatus::Pending),
            "in_progress" => Ok(SyncItemStatus::InProgress),
            "synced" => Ok(SyncItemStatus::Synced),
            "failed" => Ok(SyncItemStatus::Failed),
            _ => Err(DomainError::Validation(ValidationError::custom(
                &format!("Invalid SyncItemStatus string: {}", s)
            )))
        }
    }
}

impl From<SyncItemStatus> for String {
    fn from(status: SyncItemStatus) -> Self {
        status.as_str().to_string()
    }
}

/// One queued unit of work: an entity awaiting remote acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub priority: i64,
    pub retry_count: u32,
    pub status: SyncItemStatus,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw `sync_queue` row
#[derive(Debug, Clone, FromRow)]
pub struct SyncItemRow {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub priority: i64,
    pub retry_count: i64,
    pub status: String,
    pub last_attempt_at: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SyncItemRow {
    pub fn into_entity(self) -> DomainResult<SyncItem> {
        Ok(SyncItem {
            id: Uuid::parse_str(&self.id)
                .map_err(|_| DomainError::Validation(ValidationError::format("id", "must be a UUID")))?,
            entity_type: EntityType::from_str(&self.entity_type)?,
            entity_id: self.entity_id,
            priority: self.priority,
            retry_count: u32::try_from(self.retry_count).unwrap_or(0),
            status: SyncItemStatus::from_str(&self.status)?,
            last_attempt_at: parse_optional_db_timestamp("last_attempt_at", self.last_attempt_at.as_deref())?,
            error_message: self.error_message,
            created_at: crate::utils::parse_db_timestamp("created_at", &self.created_at)?,
            updated_at: crate::utils::parse_db_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

/// Outcome of a full sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success_count: u32,
    pub failure_count: u32,
    pub pending_count: u64,
}

/// Where a pass currently is for one entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Started,
    InProgress,
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatusEvent {
    pub entity_type: EntityType,
    pub phase: SyncPhase,
    pub completed: u32,
    pub total: u32,
}

/// Queue depth per type and status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub counts: HashMap<EntityType, HashMap<SyncItemStatus, u64>>,
}

impl QueueStatus {
    pub fn count(&self, entity_type: EntityType, status: SyncItemStatus) -> u64 {
        self.counts
            .get(&entity_type)
            .and_then(|by_status| by_status.get(&status))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self, status: SyncItemStatus) -> u64 {
        self.counts
            .values()
            .filter_map(|by_status| by_status.get(&status))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_order_matches_priority() {
        let priorities: Vec<_> = EntityType::SYNC_ORDER.iter().map(|t| t.priority()).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
        assert_eq!(EntityType::TimeRecord.priority().as_i64(), 1);
    }

    #[test]
    fn test_entity_type_string_roundtrip() {
        for entity_type in EntityType::SYNC_ORDER {
            assert_eq!(EntityType::from_str(entity_type.as_str()).unwrap(), entity_type);
        }
        assert!(EntityType::from_str("invoice").is_err());
    }

    #[test]
    fn test_queue_status_totals() {
        let mut status = QueueStatus::default();
        status.counts.entry(EntityType::Report).or_default().insert(SyncItemStatus::Pending, 2);
        status.counts.entry(EntityType::Photo).or_default().insert(SyncItemStatus::Pending, 3);
        assert_eq!(status.total(SyncItemStatus::Pending), 5);
        assert_eq!(status.count(EntityType::Photo, SyncItemStatus::Failed), 0);
    }
}
