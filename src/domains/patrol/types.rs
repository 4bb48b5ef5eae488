use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of the patrol state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatrolPhase {
    Idle,
    Active,
    Completed,
}

/// One checkpoint round at a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatrolSession {
    pub location_id: String,
    pub user_id: String,
    pub total_checkpoints: u32,
    pub verified_checkpoints: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl PatrolSession {
    pub fn is_complete(&self) -> bool {
        self.verified_checkpoints >= self.total_checkpoints
    }
}

/// Result of a verification request. Everything except `Verified` leaves
/// no trace in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VerifyOutcome {
    Verified { verification_id: Uuid },
    NoActivePatrol,
    UnknownCheckpoint,
    OutOfRange,
    AlreadyVerified,
    /// No location fix has been received since the patrol started.
    NoLocationFix,
}

impl VerifyOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerifyOutcome::Verified { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatrolEvent {
    Started(PatrolSession),
    CheckpointVerified {
        checkpoint_id: String,
        verified: u32,
        total: u32,
    },
    Ended(PatrolSession),
    Cancelled(PatrolSession),
}

/// A sample from the location source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}
