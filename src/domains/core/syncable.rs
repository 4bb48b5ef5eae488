use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domains::sync::types::EntityType;
use crate::validation::Validate;

/// Domain fields of a record that is synchronised with the remote authority.
pub trait EntityPayload:
    Serialize + DeserializeOwned + Validate + Clone + fmt::Debug + Send + Sync + 'static
{
    const ENTITY_TYPE: EntityType;
}

/// A locally stored entity plus its sync bookkeeping.
///
/// `remote_id` is assigned once, when the remote acknowledges the record, and
/// `is_synced` stays false until then. Every local edit bumps `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord<P> {
    pub local_id: Uuid,
    pub remote_id: Option<String>,
    pub is_synced: bool,
    pub timestamp: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub version: i64,
    pub payload: P,
}

impl<P: EntityPayload> SyncRecord<P> {
    pub fn new(payload: P, now: DateTime<Utc>) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            remote_id: None,
            is_synced: false,
            timestamp: now,
            last_modified: now,
            version: 1,
            payload,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        P::ENTITY_TYPE
    }

    /// Client-supplied id that makes remote create/update calls idempotent.
    pub fn correlation_id(&self) -> String {
        self.local_id.to_string()
    }
}
