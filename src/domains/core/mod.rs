pub mod clock;
pub mod photo_store;
pub mod repository;
pub mod syncable;

pub use clock::{Clock, SystemClock};
pub use photo_store::{LocalPhotoStore, PhotoStore};
pub use repository::{FindById, SqliteSyncableRepository, SyncableRepository};
pub use syncable::{EntityPayload, SyncRecord};
