pub mod repository;
pub mod types;

pub use repository::{CheckpointRepository, SqliteCheckpointRepository};
pub use types::Checkpoint;
