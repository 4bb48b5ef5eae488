pub mod checkpoint;
pub mod connectivity;
pub mod core;
pub mod geofence;
pub mod patrol;
pub mod records;
pub mod resilience;
pub mod sync;
