pub mod service;
pub mod types;

pub use service::{FieldRecordService, NewPhoto, NewReport};
pub use types::{CheckpointVerification, ClockEvent, LocationPoint, Photo, Report, ReportSeverity, TimeRecord};
