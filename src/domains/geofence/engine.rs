use crate::domains::checkpoint::Checkpoint;
use crate::domains::geofence::distance::{feet_to_meters, haversine_meters};
use crate::errors::{DomainResult, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::{broadcast, RwLock};

pub const DEFAULT_PROXIMITY_THRESHOLD_FEET: f64 = 100.0;

/// A checkpoint crossed into or out of range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityEvent {
    pub checkpoint_id: String,
    pub is_in_range: bool,
}

#[derive(Debug, Default)]
struct MonitorState {
    monitoring: bool,
    checkpoints: Vec<Checkpoint>,
    /// Last known range state per checkpoint; absent means out of range.
    in_range: HashMap<String, bool>,
}

/// Evaluates location fixes against the monitored checkpoints.
pub struct GeofenceEngine {
    state: RwLock<MonitorState>,
    threshold_feet: RwLock<f64>,
    events: broadcast::Sender<ProximityEvent>,
}

impl GeofenceEngine {
    pub fn new(threshold_feet: f64) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: RwLock::new(MonitorState::default()),
            threshold_feet: RwLock::new(threshold_feet),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProximityEvent> {
        self.events.subscribe()
    }

    /// Replace the monitored set. Every checkpoint starts out of range.
    pub async fn start_monitoring(&self, checkpoints: Vec<Checkpoint>) -> DomainResult<()> {
        if checkpoints.is_empty() {
            return Err(ValidationError::required("checkpoints").into());
        }

        let mut state = self.state.write().await;
        state.in_range = checkpoints.iter().map(|c| (c.id.clone(), false)).collect();
        state.checkpoints = checkpoints;
        state.monitoring = true;
        log::info!("Monitoring {} checkpoints", state.checkpoints.len());
        Ok(())
    }

    pub async fn stop_monitoring(&self) {
        let mut state = self.state.write().await;
        if state.monitoring {
            log::info!("Stopped monitoring {} checkpoints", state.checkpoints.len());
        }
        *state = MonitorState::default();
    }

    pub async fn is_monitoring(&self) -> bool {
        self.state.read().await.monitoring
    }

    pub async fn monitored(&self) -> Vec<Checkpoint> {
        self.state.read().await.checkpoints.clone()
    }

    pub async fn proximity_threshold_feet(&self) -> f64 {
        *self.threshold_feet.read().await
    }

    /// Takes effect from the next check.
    pub async fn set_proximity_threshold_feet(&self, feet: f64) -> DomainResult<()> {
        if !feet.is_finite() || feet <= 0.0 {
            return Err(ValidationError::invalid_value(
                "proximity_threshold_feet",
                "must be a positive number of feet",
            )
            .into());
        }
        *self.threshold_feet.write().await = feet;
        Ok(())
    }

    /// Ids of every monitored checkpoint within the threshold of the fix.
    /// Emits a `ProximityEvent` for each checkpoint whose state changed.
    pub async fn check_proximity(&self, latitude: f64, longitude: f64) -> HashSet<String> {
        let threshold_m = feet_to_meters(self.proximity_threshold_feet().await);
        let mut state = self.state.write().await;
        if !state.monitoring {
            return HashSet::new();
        }

        let mut in_range = HashSet::new();
        let mut transitions = Vec::new();
        for checkpoint in &state.checkpoints {
            let distance = haversine_meters(latitude, longitude, checkpoint.latitude, checkpoint.longitude);
            let now_in_range = distance <= threshold_m;
            let was_in_range = state.in_range.get(&checkpoint.id).copied().unwrap_or(false);
            if now_in_range != was_in_range {
                transitions.push((checkpoint.id.clone(), now_in_range, distance));
            }
            if now_in_range {
                in_range.insert(checkpoint.id.clone());
            }
        }

        for (checkpoint_id, is_in_range, distance) in transitions {
            log::debug!(
                "Checkpoint {} {} range ({:.1} m)",
                checkpoint_id,
                if is_in_range { "entered" } else { "left" },
                distance
            );
            state.in_range.insert(checkpoint_id.clone(), is_in_range);
            let _ = self.events.send(ProximityEvent { checkpoint_id, is_in_range });
        }

        in_range
    }
}

impl Default for GeofenceEngine {
    fn default() -> Self {
        Self::new(DEFAULT_PROXIMITY_THRESHOLD_FEET)
    }
}
