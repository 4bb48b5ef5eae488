use crate::domains::connectivity::ConnectivityMonitor;
use crate::domains::sync::handler::{EntitySyncHandler, HandlerOutcome};
use crate::domains::sync::queue::SyncQueueRepository;
use crate::domains::sync::types::{
    EntityType, QueueStatus, SyncItem, SyncPhase, SyncResult, SyncStatusEvent,
};
use crate::errors::{ServiceResult, SyncError};
use crate::utils::format_sync_operation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const RECONCILE_SCAN_LIMIT: u32 = 10_000;

/// Tuning knobs of the sync pipeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Items per entity type per pass.
    pub batch_size: u32,
    /// Failed attempts after which an item is parked as Failed.
    pub retry_cap: u32,
    /// Quiet period after connectivity returns before a pass starts.
    pub debounce: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            retry_cap: 10,
            debounce: Duration::from_secs(3),
        }
    }
}

/// How the pass proceeds after one item
enum ItemFlow {
    Continue,
    /// Leave the rest of this entity type for a later pass.
    SkipType,
    Stop,
}

#[derive(Default)]
struct Tally {
    success: u32,
    failure: u32,
}

/// A spawned background loop and the token that stops it
struct BackgroundTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                log::error!("Background sync task ended abnormally: {}", e);
            }
        }
    }
}

/// Drains the sync queue: one pass at a time, entity types in priority
/// order, each item routed to its handler.
pub struct SyncOrchestrator {
    queue: Arc<dyn SyncQueueRepository>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    handlers: HashMap<EntityType, Arc<dyn EntitySyncHandler>>,
    settings: SyncSettings,
    gate: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SyncStatusEvent>,
    /// Queue depth from the last successful count.
    last_pending: AtomicU64,
    shutdown: CancellationToken,
    scheduled: Mutex<Option<BackgroundTask>>,
    listener: Mutex<Option<BackgroundTask>>,
}

impl SyncOrchestrator {
    pub fn new(
        queue: Arc<dyn SyncQueueRepository>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        settings: SyncSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(128);
        Self {
            queue,
            connectivity,
            handlers: HashMap::new(),
            settings,
            gate: tokio::sync::Mutex::new(()),
            events,
            last_pending: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            scheduled: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    /// Register the handler for one entity type
    pub fn register_handler(&mut self, handler: Arc<dyn EntitySyncHandler>) {
        self.handlers.insert(handler.entity_type(), handler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncStatusEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    fn emit(&self, entity_type: EntityType, phase: SyncPhase, completed: u32, total: u32) {
        // No subscribers is fine
        let _ = self.events.send(SyncStatusEvent { entity_type, phase, completed, total });
    }

    async fn pending_count(&self) -> u64 {
        match self.queue.outstanding_count().await {
            Ok(count) => {
                self.last_pending.store(count, Ordering::SeqCst);
                count
            }
            Err(e) => {
                let last = self.last_pending.load(Ordering::SeqCst);
                log::error!("Failed to count outstanding sync items, reporting last known {}: {}", last, e);
                last
            }
        }
    }

    /// Token for one pass: cancelled by the caller's token or by shutdown.
    fn pass_token(&self, caller: &CancellationToken) -> (CancellationToken, JoinHandle<()>) {
        let pass = self.shutdown.child_token();
        let linked = pass.clone();
        let caller = caller.clone();
        let link = tokio::spawn(async move {
            tokio::select! {
                _ = caller.cancelled() => linked.cancel(),
                _ = linked.cancelled() => {}
            }
        });
        (pass, link)
    }

    /// Run one full pass over the queue.
    ///
    /// Returns immediately with the queue depth when another pass is running
    /// or the device is offline. Remote errors never escape; they are counted
    /// and logged.
    pub async fn sync_all(&self, cancel: &CancellationToken) -> SyncResult {
        let _gate = match self.gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::debug!("Sync pass already running, skipping");
                return SyncResult { pending_count: self.pending_count().await, ..Default::default() };
            }
        };

        if !self.connectivity.is_connected() {
            log::info!("Offline, sync pass skipped");
            return SyncResult { pending_count: self.pending_count().await, ..Default::default() };
        }

        let (pass, link) = self.pass_token(cancel);
        let mut tally = Tally::default();
        log::info!("Sync pass started");

        'types: for entity_type in EntityType::SYNC_ORDER {
            if pass.is_cancelled() {
                break;
            }
            let flow = self.drain_type(entity_type, None, &pass, &mut tally).await;
            if matches!(flow, ItemFlow::Stop) {
                break 'types;
            }
        }

        pass.cancel();
        link.abort();

        let result = SyncResult {
            success_count: tally.success,
            failure_count: tally.failure,
            pending_count: self.pending_count().await,
        };
        log::info!(
            "Sync pass finished: {} succeeded, {} failed, {} pending",
            result.success_count, result.failure_count, result.pending_count
        );
        result
    }

    /// Sync one entity type now, or a single entity when `entity_id` is given.
    /// Returns `false` when nothing could be attempted or any item failed.
    pub async fn sync_entity(&self, entity_type: EntityType, entity_id: Option<String>) -> ServiceResult<bool> {
        let _gate = match self.gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => return Ok(false),
        };
        if !self.connectivity.is_connected() {
            return Ok(false);
        }

        let only = match entity_id {
            Some(id) => match self.queue.find_outstanding(entity_type, &id).await? {
                Some(item) => Some(item),
                None => return Ok(true),
            },
            None => None,
        };

        let (pass, link) = self.pass_token(&CancellationToken::new());
        let mut tally = Tally::default();
        let flow = self.drain_type(entity_type, only, &pass, &mut tally).await;
        pass.cancel();
        link.abort();

        Ok(!matches!(flow, ItemFlow::Stop | ItemFlow::SkipType) && tally.failure == 0)
    }

    async fn drain_type(
        &self,
        entity_type: EntityType,
        only: Option<SyncItem>,
        pass: &CancellationToken,
        tally: &mut Tally,
    ) -> ItemFlow {
        let handler = match self.handlers.get(&entity_type) {
            Some(handler) => handler.clone(),
            None => {
                log::warn!("No sync handler registered for {}", entity_type);
                return ItemFlow::SkipType;
            }
        };

        if !self.connectivity.should_attempt_operation(entity_type.operation_kind()) {
            log::info!(
                "Deferring {} sync on {:?} connection",
                entity_type,
                self.connectivity.connection_quality()
            );
            self.emit(entity_type, SyncPhase::Skipped, 0, 0);
            return ItemFlow::SkipType;
        }

        let items = match only {
            Some(item) => vec![item],
            None => match self.queue.next_batch(entity_type, self.settings.batch_size).await {
                Ok(items) => items,
                Err(e) => {
                    log::error!("Failed to load {} batch: {}", entity_type, e);
                    self.emit(entity_type, SyncPhase::Failed, 0, 0);
                    return ItemFlow::Continue;
                }
            },
        };
        if items.is_empty() {
            return ItemFlow::Continue;
        }

        let total = items.len() as u32;
        let failures_before = tally.failure;
        self.emit(entity_type, SyncPhase::Started, 0, total);

        let mut completed = 0;
        let mut flow = ItemFlow::Continue;
        for item in items {
            if pass.is_cancelled() {
                flow = ItemFlow::Stop;
                break;
            }
            flow = self.process_item(handler.as_ref(), &item, pass, tally).await;
            completed += 1;
            self.emit(entity_type, SyncPhase::InProgress, completed, total);
            if !matches!(flow, ItemFlow::Continue) {
                break;
            }
        }

        let phase = if tally.failure > failures_before || !matches!(flow, ItemFlow::Continue) {
            SyncPhase::Failed
        } else {
            SyncPhase::Completed
        };
        self.emit(entity_type, phase, completed, total);
        flow
    }

    async fn process_item(
        &self,
        handler: &dyn EntitySyncHandler,
        item: &SyncItem,
        pass: &CancellationToken,
        tally: &mut Tally,
    ) -> ItemFlow {
        let entity_type = item.entity_type.as_str();
        if let Err(e) = self.queue.mark_in_progress(item.id).await {
            log::error!("Failed to claim sync item {}: {}", item.id, e);
            return ItemFlow::Continue;
        }

        let outcome = handler.sync_item(item, pass).await;

        let bookkeeping = match &outcome {
            Ok(HandlerOutcome::Accepted)
            | Ok(HandlerOutcome::ConflictResolved)
            | Ok(HandlerOutcome::AlreadySynced) => {
                tally.success += 1;
                log::debug!("{}", format_sync_operation("push", entity_type, &item.entity_id, "synced", None));
                self.queue.mark_synced(item.id).await
            }
            Ok(HandlerOutcome::Superseded) => {
                tally.success += 1;
                self.queue.revert_to_pending(item.id).await
            }
            Ok(HandlerOutcome::Missing) => {
                tally.failure += 1;
                self.queue
                    .mark_rejected(item.id, "local entity no longer exists")
                    .await
                    .map(|_| ())
            }
            Err(SyncError::Cancelled) | Err(SyncError::CircuitOpen { .. }) => {
                self.queue.revert_to_pending(item.id).await
            }
            Err(e) if e.is_authoritative_rejection() => {
                tally.failure += 1;
                self.queue.mark_rejected(item.id, &e.to_string()).await.map(|_| ())
            }
            Err(e) => {
                tally.failure += 1;
                log::warn!(
                    "{}",
                    format_sync_operation("push", entity_type, &item.entity_id, "failed", Some(&e.to_string()))
                );
                self.queue
                    .record_failure(item.id, &e.to_string(), self.settings.retry_cap)
                    .await
                    .map(|_| ())
            }
        };

        if let Err(e) = bookkeeping {
            log::error!("Failed to update sync item {}: {}", item.id, e);
        }

        match outcome {
            Err(SyncError::Cancelled) => ItemFlow::Stop,
            Err(SyncError::CircuitOpen { endpoint }) => {
                log::info!("Circuit open for '{}', leaving remaining {} items for later", endpoint, entity_type);
                ItemFlow::SkipType
            }
            _ => ItemFlow::Continue,
        }
    }

    /// Crash recovery, run once at startup.
    pub async fn recover(&self) -> ServiceResult<u64> {
        let reset = self.queue.reset_in_progress().await?;
        let requeued = self.reconcile_queue().await?;
        Ok(reset + requeued)
    }

    /// Enqueue every unsynced entity that has no outstanding queue item.
    pub async fn reconcile_queue(&self) -> ServiceResult<u64> {
        let mut enqueued = 0;
        for entity_type in EntityType::SYNC_ORDER {
            let Some(handler) = self.handlers.get(&entity_type) else { continue };
            for entity_id in handler.unsynced_ids(RECONCILE_SCAN_LIMIT).await? {
                if self.queue.find_outstanding(entity_type, &entity_id).await?.is_none() {
                    self.queue.enqueue(entity_type, &entity_id, entity_type.priority()).await?;
                    enqueued += 1;
                }
            }
        }
        if enqueued > 0 {
            log::warn!("Re-enqueued {} unsynced entities missing from the queue", enqueued);
        }
        Ok(enqueued)
    }

    pub async fn requeue_failed(&self, entity_type: Option<EntityType>) -> ServiceResult<u64> {
        Ok(self.queue.requeue_failed(entity_type).await?)
    }

    pub async fn queue_status(&self) -> ServiceResult<QueueStatus> {
        Ok(self.queue.status().await?)
    }

    /// Run a full pass every `interval`, replacing any earlier schedule.
    pub fn schedule_sync(self: &Arc<Self>, interval: Duration) {
        let cancel = self.shutdown.child_token();
        let token = cancel.clone();
        let orchestrator = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        orchestrator.sync_all(&token).await;
                    }
                }
            }
            log::debug!("Scheduled sync stopped");
        });

        let previous = self
            .scheduled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(BackgroundTask { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        log::info!("Scheduled sync every {:?}", interval);
    }

    pub fn cancel_scheduled_sync(&self) {
        let task = self.scheduled.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(task) = task {
            task.cancel.cancel();
            log::info!("Scheduled sync cancelled");
        }
    }

    /// Trigger a pass whenever connectivity comes back and stays up for the
    /// debounce window. Each new change restarts the window.
    pub fn start_connectivity_listener(self: &Arc<Self>) {
        let cancel = self.shutdown.child_token();
        let token = cancel.clone();
        let orchestrator = Arc::clone(self);
        let mut rx = self.connectivity.subscribe();
        let debounce = self.settings.debounce;
        let mut was_connected = rx.borrow_and_update().is_connected;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = rx.changed() => if changed.is_err() { break },
                }
                let connected = rx.borrow_and_update().is_connected;
                if !connected || was_connected {
                    was_connected = connected;
                    continue;
                }

                log::debug!("Connectivity restored, waiting {:?} before syncing", debounce);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(debounce) => break,
                        changed = rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                            rx.borrow_and_update();
                        }
                    }
                }

                was_connected = rx.borrow().is_connected;
                if was_connected {
                    orchestrator.sync_all(&token).await;
                }
            }
        });

        let previous = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(BackgroundTask { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    /// Stop every timer and cancel a running pass.
    pub async fn shutdown(&self) {
        log::info!("Shutting down sync orchestrator");
        self.shutdown.cancel();
        let scheduled = self.scheduled.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        let listener = self.listener.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        for task in [scheduled, listener].into_iter().flatten() {
            task.stop().await;
        }
    }
}
