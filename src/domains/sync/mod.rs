pub mod conflict;
pub mod handler;
pub mod orchestrator;
pub mod queue;
pub mod remote;
pub mod retention;
pub mod types;

pub use handler::{EntitySyncHandler, HandlerOutcome, PhotoSyncHandler, RecordSyncHandler};
pub use orchestrator::{SyncOrchestrator, SyncSettings};
pub use queue::{SqliteSyncQueueRepository, SyncQueueRepository};
pub use remote::{ApiRemoteSyncClient, RemoteSyncClient, TokenProvider};
pub use types::*;
