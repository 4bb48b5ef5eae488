use crate::domains::core::clock::Clock;
use crate::domains::core::repository::SyncableRepository;
use crate::domains::core::syncable::{EntityPayload, SyncRecord};
use crate::domains::geofence::ProximityEvent;
use crate::domains::patrol::service::PatrolStateMachine;
use crate::domains::patrol::types::LocationFix;
use crate::domains::records::types::LocationPoint;
use crate::domains::sync::queue::SyncQueueRepository;
use crate::errors::ServiceResult;
use crate::validation::common::validate_coordinates;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    /// Fixes older than this on arrival carry no new information.
    pub max_fix_age: Duration,
    /// Minimum spacing between stored breadcrumbs.
    pub breadcrumb_interval: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            max_fix_age: Duration::from_secs(120),
            breadcrumb_interval: Duration::from_secs(30),
        }
    }
}

/// Why a fix was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixRejection {
    Stale,
    OutOfOrder,
    InvalidCoordinates,
}

/// Background loop between the location source and the patrol.
///
/// Fresh fixes go to the state machine, proximity transitions go to the
/// presenter, and while a patrol is active a breadcrumb is stored at most
/// once per `breadcrumb_interval`.
pub struct LocationTracker {
    machine: Arc<PatrolStateMachine>,
    locations: Arc<dyn SyncableRepository<LocationPoint>>,
    queue: Arc<dyn SyncQueueRepository>,
    clock: Arc<dyn Clock>,
    settings: TrackerSettings,
    proximity: broadcast::Receiver<ProximityEvent>,
    last_fix_at: Option<DateTime<Utc>>,
    last_breadcrumb_at: Option<DateTime<Utc>>,
}

impl LocationTracker {
    pub fn new(
        machine: Arc<PatrolStateMachine>,
        locations: Arc<dyn SyncableRepository<LocationPoint>>,
        queue: Arc<dyn SyncQueueRepository>,
        clock: Arc<dyn Clock>,
        settings: TrackerSettings,
    ) -> Self {
        let proximity = machine.geofence().subscribe();
        Self {
            machine,
            locations,
            queue,
            clock,
            settings,
            proximity,
            last_fix_at: None,
            last_breadcrumb_at: None,
        }
    }

    /// Consume `fixes` until the stream ends or `cancel` fires.
    pub async fn run<S>(mut self, fixes: S, cancel: CancellationToken)
    where
        S: Stream<Item = LocationFix> + Send + Unpin,
    {
        log::info!("Starting location tracker");
        let mut fixes = fixes;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Received shutdown signal, stopping location tracker");
                    break;
                }
                next = fixes.next() => match next {
                    Some(fix) => {
                        if let Err(rejection) = self.process_fix(fix).await {
                            log::debug!("Dropped location fix: {:?}", rejection);
                        }
                    }
                    None => {
                        log::info!("Location source ended");
                        break;
                    }
                },
                event = self.proximity.recv() => match event {
                    Ok(event) => self.relay(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Location tracker skipped {} proximity events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    pub fn spawn<S>(self, fixes: S, cancel: CancellationToken) -> JoinHandle<()>
    where
        S: Stream<Item = LocationFix> + Send + Unpin + 'static,
    {
        tokio::spawn(self.run(fixes, cancel))
    }

    /// Filter one fix and, if accepted, hand it on.
    pub async fn process_fix(&mut self, fix: LocationFix) -> Result<(), FixRejection> {
        if validate_coordinates(fix.latitude, fix.longitude).is_err() {
            return Err(FixRejection::InvalidCoordinates);
        }
        let max_age = chrono::Duration::from_std(self.settings.max_fix_age).unwrap_or(chrono::Duration::MAX);
        if self.clock.now() - fix.timestamp > max_age {
            return Err(FixRejection::Stale);
        }
        if self.last_fix_at.is_some_and(|last| fix.timestamp <= last) {
            return Err(FixRejection::OutOfOrder);
        }
        self.last_fix_at = Some(fix.timestamp);

        self.machine.handle_location_fix(fix).await;

        if self.breadcrumb_due(fix.timestamp) {
            match self.store_breadcrumb(&fix).await {
                Ok(true) => self.last_breadcrumb_at = Some(fix.timestamp),
                Ok(false) => {}
                Err(e) => log::error!("Failed to store breadcrumb: {}", e),
            }
        }
        Ok(())
    }

    fn relay(&self, event: &ProximityEvent) {
        self.machine
            .presenter()
            .proximity_changed(&event.checkpoint_id, event.is_in_range);
    }

    fn breadcrumb_due(&self, at: DateTime<Utc>) -> bool {
        let interval = chrono::Duration::from_std(self.settings.breadcrumb_interval).unwrap_or(chrono::Duration::MAX);
        match self.last_breadcrumb_at {
            None => true,
            Some(last) => at - last >= interval,
        }
    }

    async fn store_breadcrumb(&self, fix: &LocationFix) -> ServiceResult<bool> {
        let Some(session) = self.machine.current_session().await else {
            return Ok(false);
        };
        if !self.machine.is_active().await {
            return Ok(false);
        }

        let point = LocationPoint {
            user_id: session.user_id,
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy: fix.accuracy,
            recorded_at: fix.timestamp,
        };
        let saved = self
            .locations
            .save(&SyncRecord::new(point, self.clock.now()))
            .await?;
        self.queue
            .enqueue(
                LocationPoint::ENTITY_TYPE,
                &saved.local_id.to_string(),
                LocationPoint::ENTITY_TYPE.priority(),
            )
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthContext;
    use crate::domains::checkpoint::{Checkpoint, CheckpointRepository, SqliteCheckpointRepository};
    use crate::domains::core::clock::FakeClock;
    use crate::domains::core::repository::SqliteSyncableRepository;
    use crate::domains::geofence::GeofenceEngine;
    use crate::domains::patrol::presenter::mock::{PresenterCall, RecordingPresenter};
    use crate::domains::records::types::CheckpointVerification;
    use crate::domains::sync::queue::SqliteSyncQueueRepository;
    use crate::test_support::memory_pool;
    use chrono::TimeZone;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    const LAT: f64 = 51.5007;
    const LON: f64 = -0.1246;

    struct Harness {
        machine: Arc<PatrolStateMachine>,
        tracker: LocationTracker,
        locations: Arc<SqliteSyncableRepository<LocationPoint>>,
        presenter: Arc<RecordingPresenter>,
        clock: Arc<FakeClock>,
    }

    async fn harness() -> Harness {
        let pool = memory_pool().await;
        let clock = Arc::new(FakeClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 22, 0, 0).unwrap()));
        let checkpoints = Arc::new(SqliteCheckpointRepository::new(pool.clone()));
        checkpoints
            .upsert_many(&[Checkpoint {
                id: "gate".into(),
                location_id: "site-1".into(),
                name: Some("Main gate".into()),
                latitude: LAT,
                longitude: LON,
                updated_at: clock.now(),
            }])
            .await
            .unwrap();

        let queue = Arc::new(SqliteSyncQueueRepository::new(pool.clone(), clock.clone()));
        let presenter = Arc::new(RecordingPresenter::default());
        let machine = Arc::new(PatrolStateMachine::new(
            checkpoints,
            Arc::new(GeofenceEngine::default()),
            Arc::new(SqliteSyncableRepository::<CheckpointVerification>::new(pool.clone())),
            queue.clone(),
            presenter.clone(),
            clock.clone(),
        ));
        let locations = Arc::new(SqliteSyncableRepository::<LocationPoint>::new(pool));
        let tracker = LocationTracker::new(
            machine.clone(),
            locations.clone(),
            queue,
            clock.clone(),
            TrackerSettings::default(),
        );
        Harness { machine, tracker, locations, presenter, clock }
    }

    fn fix(at: DateTime<Utc>) -> LocationFix {
        LocationFix { latitude: LAT, longitude: LON, accuracy: Some(4.0), timestamp: at }
    }

    #[tokio::test]
    async fn test_stale_and_out_of_order_fixes_are_dropped() {
        let mut h = harness().await;
        let now = h.clock.now();

        assert_eq!(
            h.tracker.process_fix(fix(now - chrono::Duration::minutes(10))).await,
            Err(FixRejection::Stale)
        );
        assert!(h.tracker.process_fix(fix(now)).await.is_ok());
        assert_eq!(
            h.tracker.process_fix(fix(now - chrono::Duration::seconds(5))).await,
            Err(FixRejection::OutOfOrder)
        );
        assert_eq!(h.tracker.process_fix(fix(now)).await, Err(FixRejection::OutOfOrder));

        let bad = LocationFix { latitude: 91.0, ..fix(now + chrono::Duration::seconds(1)) };
        assert_eq!(h.tracker.process_fix(bad).await, Err(FixRejection::InvalidCoordinates));
    }

    #[tokio::test]
    async fn test_breadcrumbs_only_during_patrol_and_throttled() {
        let mut h = harness().await;
        let start = h.clock.now();

        h.tracker.process_fix(fix(start)).await.unwrap();
        assert_eq!(h.locations.count_pending().await.unwrap(), 0);

        h.machine.start_patrol("site-1", &AuthContext::new("officer-1", "ipad-1")).await.unwrap();
        for secs in [1, 11, 21, 31, 45, 62] {
            let at = start + chrono::Duration::seconds(secs);
            h.clock.set(at);
            h.tracker.process_fix(fix(at)).await.unwrap();
        }
        // 1s, 31s and 62s are at least 30s apart
        assert_eq!(h.locations.count_pending().await.unwrap(), 3);
        let points = h.locations.get_pending(10).await.unwrap();
        assert!(points.iter().all(|p| p.payload.user_id == "officer-1"));
    }

    #[tokio::test]
    async fn test_fresh_fix_enables_verification() {
        let mut h = harness().await;
        h.machine.start_patrol("site-1", &AuthContext::new("officer-1", "ipad-1")).await.unwrap();
        h.tracker.process_fix(fix(h.clock.now())).await.unwrap();
        assert!(h.machine.verify_checkpoint("gate").await.unwrap().is_verified());
    }

    #[tokio::test]
    async fn test_run_relays_proximity_and_stops_on_cancel() {
        let h = harness().await;
        h.machine.start_patrol("site-1", &AuthContext::new("officer-1", "ipad-1")).await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = h.tracker.spawn(ReceiverStream::new(rx), cancel.clone());

        tx.send(fix(h.clock.now())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h
            .presenter
            .calls()
            .contains(&PresenterCall::Proximity("gate".into(), true)));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_ends_with_source() {
        let h = harness().await;
        let (tx, rx) = mpsc::channel::<LocationFix>(1);
        drop(tx);
        h.tracker.run(ReceiverStream::new(rx), CancellationToken::new()).await;
    }
}
