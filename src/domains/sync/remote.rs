use crate::domains::sync::types::EntityType;
use crate::errors::{RemoteResult, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Create/update of one entity, idempotent on `correlation_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushRequest {
    pub entity_type: EntityType,
    pub correlation_id: String,
    pub remote_id: Option<String>,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Photo metadata plus its bytes, sent as one multipart request.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoUpload {
    pub request: PushRequest,
    pub file_name: String,
    pub mime_type: String,
    pub sha256: String,
    pub bytes: Vec<u8>,
}

/// Remote answer to a push
#[derive(Debug, Clone, PartialEq)]
pub enum PushResponse {
    Accepted {
        remote_id: String,
        version: i64,
    },
    /// The remote holds a different version; its copy is authoritative.
    Conflict {
        remote_id: String,
        version: i64,
        last_modified: DateTime<Utc>,
        payload: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct AcceptedBody {
    remote_id: String,
    version: i64,
}

#[derive(Debug, Deserialize)]
struct ConflictBody {
    remote_id: String,
    version: i64,
    last_modified: DateTime<Utc>,
    payload: serde_json::Value,
}

/// Trait for the remote sync endpoints
#[async_trait]
pub trait RemoteSyncClient: Send + Sync {
    async fn push_entity(&self, access_token: &str, request: &PushRequest) -> RemoteResult<PushResponse>;

    async fn upload_photo(&self, access_token: &str, upload: &PhotoUpload) -> RemoteResult<PushResponse>;
}

/// Source of bearer tokens. Authentication itself happens elsewhere.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> RemoteResult<String>;

    /// Obtain a fresh token after the remote rejected the current one.
    async fn refresh(&self) -> RemoteResult<String>;
}

/// Map a finished HTTP exchange onto a push outcome.
fn classify_response(status: StatusCode, body: &str) -> RemoteResult<PushResponse> {
    if status.is_success() {
        let accepted: AcceptedBody = serde_json::from_str(body)
            .map_err(|e| SyncError::Decode(format!("accepted body: {}", e)))?;
        return Ok(PushResponse::Accepted {
            remote_id: accepted.remote_id,
            version: accepted.version,
        });
    }

    if status == StatusCode::CONFLICT {
        let conflict: ConflictBody = serde_json::from_str(body)
            .map_err(|e| SyncError::Decode(format!("conflict body: {}", e)))?;
        return Ok(PushResponse::Conflict {
            remote_id: conflict.remote_id,
            version: conflict.version,
            last_modified: conflict.last_modified,
            payload: conflict.payload,
        });
    }

    Err(SyncError::from_status(status.as_u16(), body.to_string()))
}

fn transport_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout(e.to_string())
    } else {
        SyncError::Transport(e.to_string())
    }
}

/// Implementation of RemoteSyncClient that talks to the field operations API
pub struct ApiRemoteSyncClient {
    client: Client,
    base_url: String,
}

impl ApiRemoteSyncClient {
    pub fn new(base_url: &str, request_timeout: Duration, connect_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn auth_header(&self, access_token: &str) -> String {
        format!("Bearer {}", access_token)
    }

    fn entity_url(&self, request: &PushRequest) -> String {
        match &request.remote_id {
            Some(remote_id) => format!(
                "{}/api/sync/{}/{}",
                self.base_url,
                request.entity_type.endpoint(),
                remote_id
            ),
            None => format!("{}/api/sync/{}", self.base_url, request.entity_type.endpoint()),
        }
    }

    async fn finish(response: reqwest::Response) -> RemoteResult<PushResponse> {
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        classify_response(status, &body)
    }
}

#[async_trait]
impl RemoteSyncClient for ApiRemoteSyncClient {
    async fn push_entity(&self, access_token: &str, request: &PushRequest) -> RemoteResult<PushResponse> {
        let url = self.entity_url(request);
        debug!("Pushing {} {} to {}", request.entity_type, request.correlation_id, url);

        let builder = if request.remote_id.is_some() {
            self.client.put(&url)
        } else {
            self.client.post(&url)
        };

        let response = builder
            .header("Authorization", self.auth_header(access_token))
            .header("Idempotency-Key", &request.correlation_id)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        Self::finish(response).await
    }

    async fn upload_photo(&self, access_token: &str, upload: &PhotoUpload) -> RemoteResult<PushResponse> {
        let url = self.entity_url(&upload.request);
        debug!(
            "Uploading photo {} ({} bytes) to {}",
            upload.request.correlation_id,
            upload.bytes.len(),
            url
        );

        let metadata = serde_json::to_string(&upload.request)
            .map_err(|e| SyncError::Decode(format!("photo metadata: {}", e)))?;

        let part = Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.mime_type)
            .map_err(|e| SyncError::Rejected {
                status: 0,
                message: format!("Invalid MIME type for upload: {}", e),
            })?;

        let form = Form::new()
            .part("file", part)
            .text("metadata", metadata)
            .text("sha256", upload.sha256.clone());

        let builder = if upload.request.remote_id.is_some() {
            self.client.put(&url)
        } else {
            self.client.post(&url)
        };

        let response = builder
            .header("Authorization", self.auth_header(access_token))
            .header("Idempotency-Key", &upload.request.correlation_id)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        Self::finish(response).await
    }
}

/// Scripted fakes for tests
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Remote that accepts everything unless a response has been scripted.
    #[derive(Default)]
    pub struct MockRemoteSyncClient {
        scripted: Mutex<VecDeque<RemoteResult<PushResponse>>>,
        pub pushes: Mutex<Vec<PushRequest>>,
        pub uploads: Mutex<Vec<PhotoUpload>>,
        pub tokens_seen: Mutex<Vec<String>>,
        delay: Mutex<Option<Duration>>,
    }

    impl MockRemoteSyncClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script(&self, response: RemoteResult<PushResponse>) {
            self.scripted.lock().unwrap().push_back(response);
        }

        /// Make every call take this long.
        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }

        pub fn call_count(&self) -> usize {
            self.pushes.lock().unwrap().len() + self.uploads.lock().unwrap().len()
        }

        async fn respond(&self, access_token: &str, request: &PushRequest) -> RemoteResult<PushResponse> {
            self.tokens_seen.lock().unwrap().push(access_token.to_string());
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let scripted = self.scripted.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| {
                Ok(PushResponse::Accepted {
                    remote_id: request
                        .remote_id
                        .clone()
                        .unwrap_or_else(|| format!("srv-{}", request.correlation_id)),
                    version: request.version,
                })
            })
        }
    }

    #[async_trait]
    impl RemoteSyncClient for MockRemoteSyncClient {
        async fn push_entity(&self, access_token: &str, request: &PushRequest) -> RemoteResult<PushResponse> {
            self.pushes.lock().unwrap().push(request.clone());
            self.respond(access_token, request).await
        }

        async fn upload_photo(&self, access_token: &str, upload: &PhotoUpload) -> RemoteResult<PushResponse> {
            self.uploads.lock().unwrap().push(upload.clone());
            self.respond(access_token, &upload.request).await
        }
    }

    /// Hands out "token-N", bumping N on every refresh.
    #[derive(Default)]
    pub struct MockTokenProvider {
        pub refreshes: AtomicU32,
    }

    #[async_trait]
    impl TokenProvider for MockTokenProvider {
        async fn access_token(&self) -> RemoteResult<String> {
            Ok(format!("token-{}", self.refreshes.load(Ordering::SeqCst)))
        }

        async fn refresh(&self) -> RemoteResult<String> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("token-{}", n))
        }
    }
}
