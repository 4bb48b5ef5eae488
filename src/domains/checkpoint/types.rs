use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::errors::DomainResult;
use crate::utils::parse_db_timestamp;
use crate::validation::{common, Validate};

/// A fixed point on a site that officers must visit during a patrol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub location_id: String,
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub updated_at: DateTime<Utc>,
}

impl Validate for Checkpoint {
    fn validate(&self) -> DomainResult<()> {
        common::validate_identifier("id", &self.id)?;
        common::validate_identifier("location_id", &self.location_id)?;
        common::validate_coordinates(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CheckpointRow {
    pub id: String,
    pub location_id: String,
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub updated_at: String,
}

impl CheckpointRow {
    pub fn into_entity(self) -> DomainResult<Checkpoint> {
        Ok(Checkpoint {
            updated_at: parse_db_timestamp("updated_at", &self.updated_at)?,
            id: self.id,
            location_id: self.location_id,
            name: self.name,
            latitude: self.latitude,
            longitude: self.longitude,
        })
    }
}
