pub mod presenter;
pub mod service;
pub mod tracker;
pub mod types;

pub use presenter::{NoopPresenter, PatrolPresenter};
pub use service::PatrolStateMachine;
pub use tracker::{FixRejection, LocationTracker, TrackerSettings};
pub use types::{LocationFix, PatrolEvent, PatrolPhase, PatrolSession, VerifyOutcome};
