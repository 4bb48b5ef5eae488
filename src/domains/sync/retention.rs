use crate::domains::core::clock::Clock;
use crate::domains::core::photo_store::PhotoStore;
use crate::domains::core::repository::SyncableRepository;
use crate::domains::core::syncable::EntityPayload;
use crate::domains::records::types::Photo;
use crate::domains::sync::queue::SyncQueueRepository;
use crate::errors::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Something that holds synced data which may be purged after a while.
#[async_trait]
pub trait RetentionTarget: Send + Sync {
    fn name(&self) -> &'static str;

    /// Purge synced data older than `cutoff`, returning how much went.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64>;
}

pub struct RecordRetention<P: EntityPayload> {
    repo: Arc<dyn SyncableRepository<P>>,
}

impl<P: EntityPayload> RecordRetention<P> {
    pub fn new(repo: Arc<dyn SyncableRepository<P>>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl<P: EntityPayload> RetentionTarget for RecordRetention<P> {
    fn name(&self) -> &'static str {
        P::ENTITY_TYPE.table_name()
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        self.repo.cleanup_older_than(cutoff).await
    }
}

/// Photo rows plus their stored bytes
pub struct PhotoRetention {
    repo: Arc<dyn SyncableRepository<Photo>>,
    store: Arc<dyn PhotoStore>,
}

impl PhotoRetention {
    pub fn new(repo: Arc<dyn SyncableRepository<Photo>>, store: Arc<dyn PhotoStore>) -> Self {
        Self { repo, store }
    }
}

#[async_trait]
impl RetentionTarget for PhotoRetention {
    fn name(&self) -> &'static str {
        "photos"
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        for photo in self.repo.find_synced_older_than(cutoff).await? {
            if let Err(e) = self.store.delete(&photo.payload.storage_key).await {
                log::warn!("Failed to delete bytes of photo {}: {}", photo.local_id, e);
            }
        }
        self.repo.cleanup_older_than(cutoff).await
    }
}

/// Synced rows of the sync queue
pub struct QueueRetention {
    queue: Arc<dyn SyncQueueRepository>,
}

impl QueueRetention {
    pub fn new(queue: Arc<dyn SyncQueueRepository>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl RetentionTarget for QueueRetention {
    fn name(&self) -> &'static str {
        "sync_queue"
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        self.queue.cleanup_synced(cutoff).await
    }
}

/// Periodic sweep that removes synced data past the retention window.
/// Unsynced data is never touched regardless of age.
pub struct RetentionWorker {
    targets: Vec<Arc<dyn RetentionTarget>>,
    clock: Arc<dyn Clock>,
    retention: Duration,
    interval: Duration,
}

impl RetentionWorker {
    pub fn new(clock: Arc<dyn Clock>, retention: Duration, interval: Duration) -> Self {
        Self {
            targets: Vec::new(),
            clock,
            retention,
            interval,
        }
    }

    pub fn with_target(mut self, target: Arc<dyn RetentionTarget>) -> Self {
        self.targets.push(target);
        self
    }

    /// Run one sweep over every target.
    pub async fn sweep(&self) -> u64 {
        let now = self.clock.now();
        let Some(cutoff) = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
        else {
            log::error!("Retention window of {:?} is out of range, skipping sweep", self.retention);
            return 0;
        };
        let mut purged = 0;

        for target in &self.targets {
            match target.purge_older_than(cutoff).await {
                Ok(0) => {}
                Ok(count) => {
                    log::info!("Retention purged {} rows from {}", count, target.name());
                    purged += count;
                }
                Err(e) => log::error!("Retention sweep of {} failed: {}", target.name(), e),
            }
        }
        purged
    }

    /// Sweep on every interval tick until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        log::info!("Starting retention worker");
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Received shutdown signal, stopping retention worker");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
