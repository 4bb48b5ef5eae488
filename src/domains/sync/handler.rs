use crate::domains::core::photo_store::PhotoStore;
use crate::domains::core::repository::{FindById, SyncableRepository};
use crate::domains::core::syncable::{EntityPayload, SyncRecord};
use crate::domains::records::types::Photo;
use crate::domains::resilience::ResilientExecutor;
use crate::domains::sync::conflict::{ConflictResolver, RemoteVersion};
use crate::domains::sync::remote::{PhotoUpload, PushRequest, PushResponse, RemoteSyncClient, TokenProvider};
use crate::domains::sync::types::{EntityType, SyncItem};
use crate::errors::{DomainError, DomainResult, RemoteResult, SyncError, ValidationError};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What happened to one queued entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Remote accepted the push.
    Accepted,
    /// Remote returned its own version, which was adopted.
    ConflictResolved,
    /// Entity was already acknowledged; nothing was sent.
    AlreadySynced,
    /// Remote accepted, but the entity was edited locally while in flight.
    Superseded,
    /// The local entity (or its bytes) no longer exists.
    Missing,
}

/// Pushes one entity type to the remote
#[async_trait]
pub trait EntitySyncHandler: Send + Sync {
    fn entity_type(&self) -> EntityType;

    async fn sync_item(&self, item: &SyncItem, cancel: &CancellationToken) -> RemoteResult<HandlerOutcome>;

    /// Local ids of entities still waiting for acknowledgment.
    async fn unsynced_ids(&self, limit: u32) -> DomainResult<Vec<String>>;
}

fn parse_local_id(item: &SyncItem) -> RemoteResult<Uuid> {
    Uuid::parse_str(&item.entity_id).map_err(|_| {
        SyncError::Local(DomainError::Validation(ValidationError::format(
            "entity_id",
            "queued entity id must be a UUID",
        )))
    })
}

fn build_request<P: EntityPayload>(record: &SyncRecord<P>) -> RemoteResult<PushRequest> {
    let payload = serde_json::to_value(&record.payload)
        .map_err(|e| SyncError::Local(DomainError::Internal(format!("Failed to encode payload: {}", e))))?;
    Ok(PushRequest {
        entity_type: P::ENTITY_TYPE,
        correlation_id: record.correlation_id(),
        remote_id: record.remote_id.clone(),
        version: record.version,
        timestamp: record.timestamp,
        last_modified: record.last_modified,
        payload,
    })
}

async fn load_unsynced<P: EntityPayload>(
    repo: &dyn SyncableRepository<P>,
    local_id: Uuid,
) -> RemoteResult<Option<SyncRecord<P>>> {
    match repo.find_by_id(local_id).await {
        Ok(record) => Ok(Some(record)),
        Err(DomainError::EntityNotFound(_, _)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Run `call` through the executor with the current token. A 401 triggers
/// exactly one token refresh and one more round; a second 401 stands.
async fn push_authenticated<F, Fut>(
    executor: &ResilientExecutor,
    tokens: &dyn TokenProvider,
    endpoint: &str,
    cancel: &CancellationToken,
    mut call: F,
) -> RemoteResult<PushResponse>
where
    F: FnMut(String) -> Fut + Send,
    Fut: Future<Output = RemoteResult<PushResponse>> + Send,
{
    let token = tokens.access_token().await?;
    match executor.execute(endpoint, cancel, || call(token.clone())).await {
        Err(SyncError::Unauthorized) => {
            log::info!("Access token rejected by '{}', refreshing", endpoint);
            let fresh = tokens.refresh().await?;
            executor.execute(endpoint, cancel, || call(fresh.clone())).await
        }
        other => other,
    }
}

/// Apply a push response to local state.
async fn apply_response<P: EntityPayload>(
    repo: &dyn SyncableRepository<P>,
    resolver: &ConflictResolver,
    record: &SyncRecord<P>,
    response: PushResponse,
) -> RemoteResult<HandlerOutcome> {
    match response {
        PushResponse::Accepted { remote_id, version } => {
            repo.update_sync_status(record.local_id, &remote_id, version).await?;
            let current = repo.find_by_id(record.local_id).await?;
            if current.is_synced {
                Ok(HandlerOutcome::Accepted)
            } else {
                log::debug!(
                    "{} {} was edited while in flight (v{} sent, now v{})",
                    P::ENTITY_TYPE, record.local_id, record.version, current.version
                );
                Ok(HandlerOutcome::Superseded)
            }
        }
        PushResponse::Conflict { remote_id, version, last_modified, payload } => {
            resolver
                .resolve(repo, record, RemoteVersion { remote_id, version, last_modified, payload })
                .await?;
            Ok(HandlerOutcome::ConflictResolved)
        }
    }
}

/// JSON push handler shared by every non-binary record type.
pub struct RecordSyncHandler<P: EntityPayload> {
    repo: Arc<dyn SyncableRepository<P>>,
    remote: Arc<dyn RemoteSyncClient>,
    tokens: Arc<dyn TokenProvider>,
    executor: Arc<ResilientExecutor>,
    resolver: Arc<ConflictResolver>,
}

impl<P: EntityPayload> RecordSyncHandler<P> {
    pub fn new(
        repo: Arc<dyn SyncableRepository<P>>,
        remote: Arc<dyn RemoteSyncClient>,
        tokens: Arc<dyn TokenProvider>,
        executor: Arc<ResilientExecutor>,
        resolver: Arc<ConflictResolver>,
    ) -> Self {
        Self { repo, remote, tokens, executor, resolver }
    }
}

#[async_trait]
impl<P: EntityPayload> EntitySyncHandler for RecordSyncHandler<P> {
    fn entity_type(&self) -> EntityType {
        P::ENTITY_TYPE
    }

    async fn sync_item(&self, item: &SyncItem, cancel: &CancellationToken) -> RemoteResult<HandlerOutcome> {
        let local_id = parse_local_id(item)?;
        let record = match load_unsynced(self.repo.as_ref(), local_id).await? {
            Some(record) => record,
            None => return Ok(HandlerOutcome::Missing),
        };
        if record.is_synced {
            return Ok(HandlerOutcome::AlreadySynced);
        }

        let request = build_request(&record)?;
        let response = push_authenticated(
            &self.executor,
            self.tokens.as_ref(),
            P::ENTITY_TYPE.endpoint(),
            cancel,
            |token| {
                let remote = self.remote.clone();
                let request = request.clone();
                async move { remote.push_entity(&token, &request).await }
            },
        )
        .await?;

        apply_response(self.repo.as_ref(), &self.resolver, &record, response).await
    }

    async fn unsynced_ids(&self, limit: u32) -> DomainResult<Vec<String>> {
        Ok(self
            .repo
            .get_pending(limit)
            .await?
            .into_iter()
            .map(|r| r.local_id.to_string())
            .collect())
    }
}

/// Multipart upload of photo bytes together with their metadata.
pub struct PhotoSyncHandler {
    repo: Arc<dyn SyncableRepository<Photo>>,
    store: Arc<dyn PhotoStore>,
    remote: Arc<dyn RemoteSyncClient>,
    tokens: Arc<dyn TokenProvider>,
    executor: Arc<ResilientExecutor>,
    resolver: Arc<ConflictResolver>,
}

impl PhotoSyncHandler {
    pub fn new(
        repo: Arc<dyn SyncableRepository<Photo>>,
        store: Arc<dyn PhotoStore>,
        remote: Arc<dyn RemoteSyncClient>,
        tokens: Arc<dyn TokenProvider>,
        executor: Arc<ResilientExecutor>,
        resolver: Arc<ConflictResolver>,
    ) -> Self {
        Self { repo, store, remote, tokens, executor, resolver }
    }
}

#[async_trait]
impl EntitySyncHandler for PhotoSyncHandler {
    fn entity_type(&self) -> EntityType {
        EntityType::Photo
    }

    async fn sync_item(&self, item: &SyncItem, cancel: &CancellationToken) -> RemoteResult<HandlerOutcome> {
        let local_id = parse_local_id(item)?;
        let record = match load_unsynced(self.repo.as_ref(), local_id).await? {
            Some(record) => record,
            None => return Ok(HandlerOutcome::Missing),
        };
        if record.is_synced {
            return Ok(HandlerOutcome::AlreadySynced);
        }

        let bytes = match self.store.read(&record.payload.storage_key).await {
            Ok(bytes) => bytes,
            Err(DomainError::EntityNotFound(_, _)) => {
                log::error!("Bytes for photo {} are gone, cannot upload", record.local_id);
                return Ok(HandlerOutcome::Missing);
            }
            Err(e) => return Err(e.into()),
        };

        let upload = PhotoUpload {
            request: build_request(&record)?,
            file_name: record.payload.storage_key.clone(),
            mime_type: record.payload.mime_type.clone(),
            sha256: record.payload.sha256.clone(),
            bytes,
        };

        let response = push_authenticated(
            &self.executor,
            self.tokens.as_ref(),
            EntityType::Photo.endpoint(),
            cancel,
            |token| {
                let remote = self.remote.clone();
                let upload = upload.clone();
                async move { remote.upload_photo(&token, &upload).await }
            },
        )
        .await?;

        apply_response(self.repo.as_ref(), &self.resolver, &record, response).await
    }

    async fn unsynced_ids(&self, limit: u32) -> DomainResult<Vec<String>> {
        Ok(self
            .repo
            .get_pending(limit)
            .await?
            .into_iter()
            .map(|r| r.local_id.to_string())
            .collect())
    }
}
