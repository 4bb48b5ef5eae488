use crate::config::CoreConfig;
use crate::domains::checkpoint::{CheckpointRepository, SqliteCheckpointRepository};
use crate::domains::connectivity::ConnectivityMonitor;
use crate::domains::core::clock::{Clock, SystemClock};
use crate::domains::core::photo_store::{LocalPhotoStore, PhotoStore};
use crate::domains::core::repository::{SqliteSyncableRepository, SyncableRepository};
use crate::domains::core::syncable::EntityPayload;
use crate::domains::geofence::GeofenceEngine;
use crate::domains::patrol::{LocationFix, LocationTracker, PatrolPresenter, PatrolStateMachine};
use crate::domains::records::types::{CheckpointVerification, LocationPoint, Photo, Report, TimeRecord};
use crate::domains::records::FieldRecordService;
use crate::domains::resilience::ResilientExecutor;
use crate::domains::sync::conflict::ConflictResolver;
use crate::domains::sync::retention::{PhotoRetention, QueueRetention, RecordRetention, RetentionWorker};
use crate::domains::sync::{
    ApiRemoteSyncClient, PhotoSyncHandler, RecordSyncHandler, RemoteSyncClient, SqliteSyncQueueRepository,
    SyncOrchestrator, SyncQueueRepository, TokenProvider,
};
use crate::errors::{DbError, DomainError, ServiceError, ServiceResult};
use crate::validation::Validate;
use futures::Stream;
use lazy_static::lazy_static;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Things the host application supplies. Remote client and photo store
/// fall back to the HTTP client and the local directory store.
pub struct Collaborators {
    pub connectivity: Arc<dyn ConnectivityMonitor>,
    pub tokens: Arc<dyn TokenProvider>,
    pub presenter: Arc<dyn PatrolPresenter>,
    pub clock: Arc<dyn Clock>,
    pub remote: Option<Arc<dyn RemoteSyncClient>>,
    pub photo_store: Option<Arc<dyn PhotoStore>>,
}

impl Collaborators {
    pub fn new(
        connectivity: Arc<dyn ConnectivityMonitor>,
        tokens: Arc<dyn TokenProvider>,
        presenter: Arc<dyn PatrolPresenter>,
    ) -> Self {
        Self {
            connectivity,
            tokens,
            presenter,
            clock: Arc::new(SystemClock),
            remote: None,
            photo_store: None,
        }
    }
}

/// Every wired component of a running core.
pub struct CoreServices {
    pub config: CoreConfig,
    pub pool: SqlitePool,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub patrol: Arc<PatrolStateMachine>,
    pub records: Arc<FieldRecordService>,
    pub checkpoints: Arc<dyn CheckpointRepository>,
    pub connectivity: Arc<dyn ConnectivityMonitor>,
    locations: Arc<dyn SyncableRepository<LocationPoint>>,
    queue: Arc<dyn SyncQueueRepository>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl CoreServices {
    /// Open the database, wire every component, recover the queue, and
    /// start the background loops.
    pub async fn start(config: CoreConfig, collaborators: Collaborators) -> ServiceResult<Arc<Self>> {
        config
            .validate()
            .map_err(|e| ServiceError::Configuration(e.to_string()))?;
        let clock = collaborators.clock.clone();

        // Every connection to an in-memory database is a separate database
        let max_connections = if config.database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&config.database_url)
            .await
            .map_err(DbError::from)?;
        crate::db_migration::initialize_database(&pool).await?;

        let photo_store: Arc<dyn PhotoStore> = match collaborators.photo_store {
            Some(store) => store,
            None => Arc::new(LocalPhotoStore::new(&config.photo_dir).map_err(|e| {
                DomainError::File(format!("Cannot open photo directory {}: {}", config.photo_dir, e))
            })?),
        };
        let remote: Arc<dyn RemoteSyncClient> = match collaborators.remote {
            Some(remote) => remote,
            None => Arc::new(ApiRemoteSyncClient::new(
                &config.api_base_url,
                config.request_timeout(),
                config.connect_timeout(),
            )),
        };

        let time_records = repository::<TimeRecord>(&pool);
        let verifications = repository::<CheckpointVerification>(&pool);
        let reports = repository::<Report>(&pool);
        let photos = repository::<Photo>(&pool);
        let locations = repository::<LocationPoint>(&pool);
        let checkpoints: Arc<dyn CheckpointRepository> = Arc::new(SqliteCheckpointRepository::new(pool.clone()));
        let queue: Arc<dyn SyncQueueRepository> =
            Arc::new(SqliteSyncQueueRepository::new(pool.clone(), clock.clone()));

        let executor = Arc::new(ResilientExecutor::new(
            config.retry_policy(),
            config.breaker_config(),
            clock.clone(),
        ));
        let resolver = Arc::new(ConflictResolver::new(pool.clone(), clock.clone()));
        let tokens = collaborators.tokens;

        let mut orchestrator = SyncOrchestrator::new(
            queue.clone(),
            collaborators.connectivity.clone(),
            config.sync_settings(),
        );
        orchestrator.register_handler(Arc::new(RecordSyncHandler::new(
            time_records.clone(), remote.clone(), tokens.clone(), executor.clone(), resolver.clone(),
        )));
        orchestrator.register_handler(Arc::new(RecordSyncHandler::new(
            verifications.clone(), remote.clone(), tokens.clone(), executor.clone(), resolver.clone(),
        )));
        orchestrator.register_handler(Arc::new(RecordSyncHandler::new(
            reports.clone(), remote.clone(), tokens.clone(), executor.clone(), resolver.clone(),
        )));
        orchestrator.register_handler(Arc::new(PhotoSyncHandler::new(
            photos.clone(), photo_store.clone(), remote.clone(), tokens.clone(), executor.clone(), resolver.clone(),
        )));
        orchestrator.register_handler(Arc::new(RecordSyncHandler::new(
            locations.clone(), remote, tokens, executor, resolver,
        )));
        let orchestrator = Arc::new(orchestrator);

        let recovered = orchestrator.recover().await?;
        if recovered > 0 {
            log::info!("Recovered {} sync items after restart", recovered);
        }

        let patrol = Arc::new(PatrolStateMachine::new(
            checkpoints.clone(),
            Arc::new(GeofenceEngine::new(config.proximity_threshold_feet)),
            verifications.clone(),
            queue.clone(),
            collaborators.presenter,
            clock.clone(),
        ));
        let records = Arc::new(FieldRecordService::new(
            time_records.clone(),
            locations.clone(),
            photos.clone(),
            reports.clone(),
            photo_store.clone(),
            queue.clone(),
            clock.clone(),
        ));

        let shutdown = CancellationToken::new();
        let retention = RetentionWorker::new(clock.clone(), config.retention(), config.retention_sweep_interval())
            .with_target(Arc::new(RecordRetention::new(time_records)))
            .with_target(Arc::new(RecordRetention::new(verifications)))
            .with_target(Arc::new(RecordRetention::new(reports)))
            .with_target(Arc::new(PhotoRetention::new(photos, photo_store)))
            .with_target(Arc::new(RecordRetention::new(locations.clone())))
            .with_target(Arc::new(QueueRetention::new(queue.clone())));
        let retention_handle = retention.spawn(shutdown.child_token());

        orchestrator.start_connectivity_listener();
        if let Some(interval) = config.sync_interval() {
            orchestrator.schedule_sync(interval);
        }

        log::info!("Core services started for device {}", config.device_id);
        Ok(Arc::new(Self {
            config,
            pool,
            orchestrator,
            patrol,
            records,
            checkpoints,
            connectivity: collaborators.connectivity,
            locations,
            queue,
            clock,
            shutdown,
            background: Mutex::new(vec![retention_handle]),
        }))
    }

    /// Feed a location source into the patrol until shutdown.
    pub fn start_location_tracking<S>(&self, fixes: S)
    where
        S: Stream<Item = LocationFix> + Send + Unpin + 'static,
    {
        let tracker = LocationTracker::new(
            self.patrol.clone(),
            self.locations.clone(),
            self.queue.clone(),
            self.clock.clone(),
            self.config.tracker_settings(),
        );
        let handle = tracker.spawn(fixes, self.shutdown.child_token());
        self.background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }

    /// Stop every background loop and close the database.
    pub async fn stop(&self) {
        self.orchestrator.shutdown().await;
        self.shutdown.cancel();
        let handles: Vec<_> = self
            .background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("Background task ended abnormally: {}", e);
            }
        }
        self.pool.close().await;
        log::info!("Core services stopped");
    }
}

fn repository<P: EntityPayload>(pool: &SqlitePool) -> Arc<dyn SyncableRepository<P>> {
    Arc::new(SqliteSyncableRepository::<P>::new(pool.clone()))
}

lazy_static! {
    static ref INIT_MUTEX: tokio::sync::Mutex<()> = tokio::sync::Mutex::new(());
    static ref SERVICES: Mutex<Option<Arc<CoreServices>>> = Mutex::new(None);
}

/// Default RUST_LOG by build profile, then install env_logger once.
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        #[cfg(debug_assertions)]
        std::env::set_var("RUST_LOG", "debug");
        #[cfg(not(debug_assertions))]
        std::env::set_var("RUST_LOG", "info");
    }
    let _ = env_logger::try_init();
}

/// Start the process-wide core. A second call returns the running instance.
pub async fn initialize(config: CoreConfig, collaborators: Collaborators) -> ServiceResult<Arc<CoreServices>> {
    let _guard = INIT_MUTEX.lock().await;
    if let Some(existing) = current() {
        return Ok(existing);
    }

    init_logging();
    log::info!("Initializing patrol sync core");
    log::debug!("Database URL: {}", config.database_url);

    let services = CoreServices::start(config, collaborators).await?;
    *SERVICES.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(services.clone());
    Ok(services)
}

fn current() -> Option<Arc<CoreServices>> {
    SERVICES
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

pub fn services() -> ServiceResult<Arc<CoreServices>> {
    current().ok_or_else(|| ServiceError::Configuration("Core is not initialized".to_string()))
}

pub async fn shutdown() {
    let _guard = INIT_MUTEX.lock().await;
    let services = SERVICES
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(services) = services {
        services.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthContext;
    use crate::domains::checkpoint::Checkpoint;
    use crate::domains::connectivity::{
        ConnectionQuality, ConnectionType, ConnectivityStatus, ReportedConnectivityMonitor,
    };
    use crate::domains::core::photo_store::mock::MemoryPhotoStore;
    use crate::domains::patrol::presenter::NoopPresenter;
    use crate::domains::patrol::PatrolPhase;
    use crate::domains::sync::remote::mock::{MockRemoteSyncClient, MockTokenProvider};
    use chrono::Utc;
    use std::time::Duration;

    fn test_config() -> CoreConfig {
        CoreConfig {
            database_url: "sqlite::memory:".to_string(),
            device_id: "ipad-test".to_string(),
            sync_interval_secs: 0,
            connectivity_debounce_ms: 10,
            ..CoreConfig::default()
        }
    }

    fn collaborators(
        connectivity: Arc<ReportedConnectivityMonitor>,
        remote: Arc<MockRemoteSyncClient>,
    ) -> Collaborators {
        Collaborators {
            remote: Some(remote),
            photo_store: Some(Arc::new(MemoryPhotoStore::default())),
            ..Collaborators::new(connectivity, Arc::new(MockTokenProvider::default()), Arc::new(NoopPresenter))
        }
    }

    #[tokio::test]
    async fn test_offline_work_syncs_after_reconnect() {
        let connectivity = Arc::new(ReportedConnectivityMonitor::default());
        let remote = Arc::new(MockRemoteSyncClient::new());
        let services = CoreServices::start(test_config(), collaborators(connectivity.clone(), remote.clone()))
            .await
            .unwrap();
        let officer = AuthContext::new("officer-1", "ipad-test");

        services
            .checkpoints
            .upsert_many(&[Checkpoint {
                id: "gate".into(),
                location_id: "site-1".into(),
                name: None,
                latitude: 40.0,
                longitude: -74.0,
                updated_at: Utc::now(),
            }])
            .await
            .unwrap();

        services.records.clock_in(&officer, "site-1", None).await.unwrap();
        services.patrol.start_patrol("site-1", &officer).await.unwrap();
        services
            .patrol
            .handle_location_fix(LocationFix { latitude: 40.0, longitude: -74.0, accuracy: None, timestamp: Utc::now() })
            .await;
        assert!(services.patrol.verify_checkpoint("gate").await.unwrap().is_verified());
        services.patrol.end_patrol().await.unwrap();
        assert_eq!(services.patrol.phase().await, PatrolPhase::Completed);

        let offline = services.orchestrator.sync_all(&CancellationToken::new()).await;
        assert_eq!((offline.success_count, offline.pending_count), (0, 2));
        assert_eq!(remote.call_count(), 0);

        connectivity.report(ConnectivityStatus::online(ConnectionType::Wifi, ConnectionQuality::High));
        let mut waited = Duration::ZERO;
        while remote.call_count() < 2 && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        assert_eq!(remote.call_count(), 2);

        services.stop().await;
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let connectivity = Arc::new(ReportedConnectivityMonitor::default());
        let remote = Arc::new(MockRemoteSyncClient::new());

        let zero_sweep = CoreConfig { retention_sweep_interval_secs: 0, ..test_config() };
        let result = CoreServices::start(zero_sweep, collaborators(connectivity.clone(), remote.clone())).await;
        assert!(matches!(result, Err(ServiceError::Configuration(_))));

        let empty_batches = CoreConfig { batch_size: 0, ..test_config() };
        let result = CoreServices::start(empty_batches, collaborators(connectivity, remote)).await;
        assert!(matches!(result, Err(ServiceError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent_until_shutdown() {
        let connectivity = Arc::new(ReportedConnectivityMonitor::default());
        let first = initialize(test_config(), collaborators(connectivity.clone(), Arc::new(MockRemoteSyncClient::new())))
            .await
            .unwrap();
        let second = initialize(test_config(), collaborators(connectivity, Arc::new(MockRemoteSyncClient::new())))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        shutdown().await;
        assert!(services().is_err());
    }
}
