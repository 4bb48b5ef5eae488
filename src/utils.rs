use chrono::{DateTime, SecondsFormat, Utc};

use crate::errors::{DomainError, DomainResult, ValidationError};

/// Fixed-width RFC3339 so that TEXT ordering in SQLite matches time ordering.
pub fn to_db_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_db_timestamp(field: &str, value: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DomainError::Validation(ValidationError::format(
            field, &format!("Invalid RFC3339 format: {}", value)
        )))
}

pub fn parse_optional_db_timestamp(field: &str, value: Option<&str>) -> DomainResult<Option<DateTime<Utc>>> {
    value.map(|v| parse_db_timestamp(field, v)).transpose()
}

/// Format a sync operation for log lines
pub fn format_sync_operation(
    operation: &str,
    entity_type: &str,
    entity_id: &str,
    status: &str,
    error: Option<&str>,
) -> String {
    if let Some(err) = error {
        format!("{} {}:{} - {} - Error: {}", operation, entity_type, entity_id, status, err)
    } else {
        format!("{} {}:{} - {}", operation, entity_type, entity_id, status)
    }
}
