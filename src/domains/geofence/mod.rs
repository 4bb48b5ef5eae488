pub mod distance;
pub mod engine;

pub use distance::haversine_meters;
pub use engine::{GeofenceEngine, ProximityEvent, DEFAULT_PROXIMITY_THRESHOLD_FEET};
