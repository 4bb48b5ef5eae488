use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domains::core::syncable::EntityPayload;
use crate::domains::sync::types::EntityType;
use crate::errors::{DomainResult, ValidationError};
use crate::validation::{common, Validate, ValidationBuilder};

/// Direction of a time clock punch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockEvent {
    ClockIn,
    ClockOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRecord {
    pub user_id: String,
    pub location_id: String,
    pub event: ClockEvent,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Validate for TimeRecord {
    fn validate(&self) -> DomainResult<()> {
        common::validate_identifier("user_id", &self.user_id)?;
        common::validate_identifier("location_id", &self.location_id)?;
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => common::validate_coordinates(lat, lon),
            (None, None) => Ok(()),
            _ => Err(ValidationError::custom("latitude and longitude must be given together").into()),
        }
    }
}

impl EntityPayload for TimeRecord {
    const ENTITY_TYPE: EntityType = EntityType::TimeRecord;
}

/// A breadcrumb of where the officer was
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPoint {
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl Validate for LocationPoint {
    fn validate(&self) -> DomainResult<()> {
        common::validate_identifier("user_id", &self.user_id)?;
        common::validate_coordinates(self.latitude, self.longitude)?;
        if let Some(accuracy) = self.accuracy {
            ValidationBuilder::new("accuracy", Some(accuracy))
                .range(0.0, 100_000.0)
                .validate()?;
        }
        Ok(())
    }
}

impl EntityPayload for LocationPoint {
    const ENTITY_TYPE: EntityType = EntityType::LocationPoint;
}

/// Metadata of a captured photo. The bytes live in the photo store under `storage_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub user_id: String,
    pub location_id: String,
    pub checkpoint_id: Option<String>,
    pub storage_key: String,
    pub mime_type: String,
    pub byte_len: u64,
    pub sha256: String,
    pub caption: Option<String>,
}

impl Validate for Photo {
    fn validate(&self) -> DomainResult<()> {
        common::validate_identifier("user_id", &self.user_id)?;
        common::validate_identifier("location_id", &self.location_id)?;
        common::validate_identifier("storage_key", &self.storage_key)?;
        if let Some(checkpoint_id) = &self.checkpoint_id {
            common::validate_identifier("checkpoint_id", checkpoint_id)?;
        }
        ValidationBuilder::new("mime_type", Some(self.mime_type.clone()))
            .validate_with(|value| match value.parse::<mime::Mime>() {
                Ok(m) if m.type_() == mime::IMAGE => Ok(()),
                _ => Err(ValidationError::format("mime_type", "must be an image type")),
            })
            .validate()?;
        ValidationBuilder::new("byte_len", Some(self.byte_len))
            .min(1)
            .validate()?;
        ValidationBuilder::new("caption", self.caption.clone())
            .max_length(500)
            .validate()
    }
}

impl EntityPayload for Photo {
    const ENTITY_TYPE: EntityType = EntityType::Photo;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSeverity {
    Info,
    Warning,
    Incident,
}

/// Free-form incident or activity report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub user_id: String,
    pub location_id: String,
    pub title: String,
    pub body: String,
    pub severity: ReportSeverity,
}

impl Validate for Report {
    fn validate(&self) -> DomainResult<()> {
        common::validate_identifier("user_id", &self.user_id)?;
        common::validate_identifier("location_id", &self.location_id)?;
        ValidationBuilder::new("title", Some(self.title.clone()))
            .not_blank()
            .max_length(200)
            .validate()?;
        ValidationBuilder::new("body", Some(self.body.clone()))
            .max_length(10_000)
            .validate()
    }
}

impl EntityPayload for Report {
    const ENTITY_TYPE: EntityType = EntityType::Report;
}

/// Proof that an officer stood within range of a checkpoint during a patrol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointVerification {
    pub checkpoint_id: String,
    pub location_id: String,
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub verified_at: DateTime<Utc>,
}

impl Validate for CheckpointVerification {
    fn validate(&self) -> DomainResult<()> {
        common::validate_identifier("checkpoint_id", &self.checkpoint_id)?;
        common::validate_identifier("location_id", &self.location_id)?;
        common::validate_identifier("user_id", &self.user_id)?;
        common::validate_coordinates(self.latitude, self.longitude)
    }
}

impl EntityPayload for CheckpointVerification {
    const ENTITY_TYPE: EntityType = EntityType::CheckpointVerification;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo() -> Photo {
        Photo {
            user_id: "u1".into(),
            location_id: "site-1".into(),
            checkpoint_id: None,
            storage_key: "abc.jpg".into(),
            mime_type: "image/jpeg".into(),
            byte_len: 10,
            sha256: "00".into(),
            caption: None,
        }
    }

    #[test]
    fn test_photo_validation() {
        assert!(photo().validate().is_ok());
        assert!(Photo { mime_type: "application/pdf".into(), ..photo() }.validate().is_err());
        assert!(Photo { byte_len: 0, ..photo() }.validate().is_err());
    }

    #[test]
    fn test_time_record_requires_both_coordinates() {
        let record = TimeRecord {
            user_id: "u1".into(),
            location_id: "site-1".into(),
            event: ClockEvent::ClockIn,
            latitude: Some(10.0),
            longitude: None,
        };
        assert!(record.validate().is_err());
        assert!(TimeRecord { latitude: None, ..record }.validate().is_ok());
    }

    #[test]
    fn test_report_title_required() {
        let report = Report {
            user_id: "u1".into(),
            location_id: "site-1".into(),
            title: "  ".into(),
            body: String::new(),
            severity: ReportSeverity::Warning,
        };
        assert!(report.validate().is_err());
    }
}
