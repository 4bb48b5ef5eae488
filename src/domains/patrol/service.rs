use crate::auth::AuthContext;
use crate::domains::checkpoint::{Checkpoint, CheckpointRepository};
use crate::domains::core::clock::Clock;
use crate::domains::core::repository::SyncableRepository;
use crate::domains::core::syncable::{EntityPayload, SyncRecord};
use crate::domains::geofence::GeofenceEngine;
use crate::domains::patrol::presenter::PatrolPresenter;
use crate::domains::patrol::types::{
    LocationFix, PatrolEvent, PatrolPhase, PatrolSession, VerifyOutcome,
};
use crate::domains::records::types::CheckpointVerification;
use crate::domains::sync::queue::SyncQueueRepository;
use crate::errors::{PatrolError, ServiceResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

struct PatrolState {
    phase: PatrolPhase,
    session: Option<PatrolSession>,
    checkpoints: HashMap<String, Checkpoint>,
    verified: HashSet<String>,
    last_fix: Option<LocationFix>,
}

impl PatrolState {
    fn idle() -> Self {
        Self {
            phase: PatrolPhase::Idle,
            session: None,
            checkpoints: HashMap::new(),
            verified: HashSet::new(),
            last_fix: None,
        }
    }
}

/// Owns the single patrol session of the process.
///
/// Verification requires the latest fix to be inside the geofence of the
/// checkpoint; proximity on its own never verifies anything.
pub struct PatrolStateMachine {
    checkpoints: Arc<dyn CheckpointRepository>,
    geofence: Arc<GeofenceEngine>,
    verifications: Arc<dyn SyncableRepository<CheckpointVerification>>,
    queue: Arc<dyn SyncQueueRepository>,
    presenter: Arc<dyn PatrolPresenter>,
    clock: Arc<dyn Clock>,
    state: Mutex<PatrolState>,
    events: broadcast::Sender<PatrolEvent>,
}

impl PatrolStateMachine {
    pub fn new(
        checkpoints: Arc<dyn CheckpointRepository>,
        geofence: Arc<GeofenceEngine>,
        verifications: Arc<dyn SyncableRepository<CheckpointVerification>>,
        queue: Arc<dyn SyncQueueRepository>,
        presenter: Arc<dyn PatrolPresenter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            checkpoints,
            geofence,
            verifications,
            queue,
            presenter,
            clock,
            state: Mutex::new(PatrolState::idle()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PatrolEvent> {
        self.events.subscribe()
    }

    pub fn geofence(&self) -> &Arc<GeofenceEngine> {
        &self.geofence
    }

    pub fn presenter(&self) -> &Arc<dyn PatrolPresenter> {
        &self.presenter
    }

    pub async fn phase(&self) -> PatrolPhase {
        self.state.lock().await.phase
    }

    pub async fn current_session(&self) -> Option<PatrolSession> {
        self.state.lock().await.session.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.phase().await == PatrolPhase::Active
    }

    /// Begin a patrol of every checkpoint at `location_id`.
    pub async fn start_patrol(&self, location_id: &str, auth: &AuthContext) -> ServiceResult<PatrolSession> {
        let user_id = auth.require_user()?.to_string();
        let mut state = self.state.lock().await;

        if state.phase == PatrolPhase::Active {
            let active = state
                .session
                .as_ref()
                .map(|s| s.location_id.clone())
                .unwrap_or_default();
            return Err(PatrolError::AlreadyActive(active).into());
        }

        let checkpoints = self.checkpoints.find_by_location(location_id).await?;
        if checkpoints.is_empty() {
            return Err(PatrolError::NoCheckpoints(location_id.to_string()).into());
        }

        self.geofence.start_monitoring(checkpoints.clone()).await?;

        let session = PatrolSession {
            location_id: location_id.to_string(),
            user_id,
            total_checkpoints: checkpoints.len() as u32,
            verified_checkpoints: 0,
            start_time: self.clock.now(),
            end_time: None,
        };

        self.presenter.show_checkpoints(&checkpoints);

        *state = PatrolState {
            phase: PatrolPhase::Active,
            session: Some(session.clone()),
            checkpoints: checkpoints.into_iter().map(|c| (c.id.clone(), c)).collect(),
            verified: HashSet::new(),
            last_fix: None,
        };

        log::info!(
            "Patrol started at {} with {} checkpoints",
            session.location_id,
            session.total_checkpoints
        );
        let _ = self.events.send(PatrolEvent::Started(session.clone()));
        Ok(session)
    }

    /// Verify a checkpoint against the latest location fix.
    ///
    /// Precondition failures come back as negative outcomes. Only storage
    /// errors are returned as `Err`, in which case nothing changes.
    pub async fn verify_checkpoint(&self, checkpoint_id: &str) -> ServiceResult<VerifyOutcome> {
        let mut state = self.state.lock().await;

        if state.phase != PatrolPhase::Active {
            return Ok(VerifyOutcome::NoActivePatrol);
        }
        let Some(checkpoint) = state.checkpoints.get(checkpoint_id).cloned() else {
            return Ok(VerifyOutcome::UnknownCheckpoint);
        };
        if state.verified.contains(checkpoint_id) {
            return Ok(VerifyOutcome::AlreadyVerified);
        }
        let Some(fix) = state.last_fix else {
            return Ok(VerifyOutcome::NoLocationFix);
        };
        let in_range = self.geofence.check_proximity(fix.latitude, fix.longitude).await;
        if !in_range.contains(checkpoint_id) {
            log::debug!("Checkpoint {} not in range of the latest fix", checkpoint_id);
            return Ok(VerifyOutcome::OutOfRange);
        }

        let Some(session) = state.session.as_mut() else {
            return Ok(VerifyOutcome::NoActivePatrol);
        };

        let now = self.clock.now();
        let verification = CheckpointVerification {
            checkpoint_id: checkpoint.id.clone(),
            location_id: checkpoint.location_id.clone(),
            user_id: session.user_id.clone(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            verified_at: now,
        };
        let saved = self
            .verifications
            .save(&SyncRecord::new(verification, now))
            .await?;
        self.queue
            .enqueue(
                CheckpointVerification::ENTITY_TYPE,
                &saved.local_id.to_string(),
                CheckpointVerification::ENTITY_TYPE.priority(),
            )
            .await?;

        session.verified_checkpoints += 1;
        let (verified, total) = (session.verified_checkpoints, session.total_checkpoints);
        state.verified.insert(checkpoint.id.clone());

        log::info!("Checkpoint {} verified ({}/{})", checkpoint.id, verified, total);
        self.presenter.checkpoint_verified(&checkpoint.id, verified, total);
        let _ = self.events.send(PatrolEvent::CheckpointVerified {
            checkpoint_id: checkpoint.id,
            verified,
            total,
        });

        Ok(VerifyOutcome::Verified { verification_id: saved.local_id })
    }

    /// Finish the active patrol and return the finalized session.
    pub async fn end_patrol(&self) -> Option<PatrolSession> {
        let mut state = self.state.lock().await;
        if state.phase != PatrolPhase::Active {
            return None;
        }

        let mut session = state.session.take()?;
        session.end_time = Some(self.clock.now());
        self.wind_down().await;
        *state = PatrolState {
            phase: PatrolPhase::Completed,
            session: Some(session.clone()),
            ..PatrolState::idle()
        };

        log::info!(
            "Patrol at {} ended with {}/{} checkpoints verified",
            session.location_id,
            session.verified_checkpoints,
            session.total_checkpoints
        );
        let _ = self.events.send(PatrolEvent::Ended(session.clone()));
        Some(session)
    }

    /// Abandon the active patrol. Verifications already saved stay queued.
    pub async fn cancel_patrol(&self) -> Option<PatrolSession> {
        let mut state = self.state.lock().await;
        if state.phase != PatrolPhase::Active {
            return None;
        }

        let mut session = state.session.take()?;
        session.end_time = Some(self.clock.now());
        self.wind_down().await;
        *state = PatrolState::idle();

        log::warn!(
            "Patrol at {} cancelled after {}/{} checkpoints",
            session.location_id,
            session.verified_checkpoints,
            session.total_checkpoints
        );
        let _ = self.events.send(PatrolEvent::Cancelled(session.clone()));
        Some(session)
    }

    /// Record a fresh fix and evaluate it against the geofence.
    pub async fn handle_location_fix(&self, fix: LocationFix) -> HashSet<String> {
        {
            let mut state = self.state.lock().await;
            if state.phase == PatrolPhase::Active {
                state.last_fix = Some(fix);
            }
        }
        self.geofence.check_proximity(fix.latitude, fix.longitude).await
    }

    async fn wind_down(&self) {
        self.geofence.stop_monitoring().await;
        self.presenter.clear_checkpoints();
    }
}
