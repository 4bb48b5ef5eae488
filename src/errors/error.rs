use std::fmt;
use serde::Serialize;
use thiserror::Error;

/// Database errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Record not found: {0} with ID {1}")]
    NotFound(String, String),

    #[error("Conflict error: {0}")]
    Conflict(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Database error: {0}")]
    Other(String),
}

impl serde::Serialize for DbError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let kind = match self {
            DbError::Sqlx(_) => "Sqlx",
            DbError::Transaction(_) => "Transaction",
            DbError::NotFound(_, _) => "NotFound",
            DbError::Conflict(_) => "Conflict",
            DbError::Migration(_) => "Migration",
            DbError::Other(_) => "Other",
        };
        let mut state = serializer.serialize_struct("DbError", 2)?;
        state.serialize_field("type", kind)?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Manual Clone implementation for DbError (sqlx::Error is not Clone)
impl Clone for DbError {
    fn clone(&self) -> Self {
        match self {
            DbError::Sqlx(err) => DbError::Other(format!("SQLx error: {}", err)),
            DbError::Transaction(s) => DbError::Transaction(s.clone()),
            DbError::NotFound(s1, s2) => DbError::NotFound(s1.clone(), s2.clone()),
            DbError::Conflict(s) => DbError::Conflict(s.clone()),
            DbError::Migration(s) => DbError::Migration(s.clone()),
            DbError::Other(s) => DbError::Other(s.clone()),
        }
    }
}

/// Domain-level errors
#[derive(Debug, Error, Clone, Serialize)]
pub enum DomainError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Entity not found: {0} with ID {1}")]
    EntityNotFound(String, String),

    #[error("File error: {0}")]
    File(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for DomainError {
    fn from(error: sqlx::Error) -> Self {
        DomainError::Database(DbError::from(error))
    }
}

/// Errors raised by outbound remote calls and the resilience layer around them.
#[derive(Debug, Error, Clone, Serialize)]
pub enum SyncError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server error {status}: {message}")]
    Server {
        status: u16,
        message: String,
    },

    #[error("Authentication rejected by remote")]
    Unauthorized,

    #[error("Rejected by remote ({status}): {message}")]
    Rejected {
        status: u16,
        message: String,
    },

    #[error("Circuit open for endpoint '{endpoint}'")]
    CircuitOpen {
        endpoint: String,
    },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Failed to decode remote response: {0}")]
    Decode(String),

    #[error("Local error: {0}")]
    Local(#[from] DomainError),
}

impl SyncError {
    /// Timeouts, transport failures and 5xx responses are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Timeout(_) | SyncError::Transport(_) | SyncError::Server { .. }
        )
    }

    /// A definitive "no" from the remote for this item.
    pub fn is_authoritative_rejection(&self) -> bool {
        matches!(self, SyncError::Rejected { .. } | SyncError::Unauthorized | SyncError::Decode(_))
    }

    /// Classify an HTTP status that is neither success nor conflict.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 => SyncError::Unauthorized,
            408 | 429 => SyncError::Server { status, message },
            500..=599 => SyncError::Server { status, message },
            _ => SyncError::Rejected { status, message },
        }
    }
}

/// Precondition failures of the patrol lifecycle
#[derive(Debug, Error, Clone, PartialEq, Serialize)]
pub enum PatrolError {
    #[error("A patrol is already active for location {0}")]
    AlreadyActive(String),

    #[error("Location {0} has no checkpoints to patrol")]
    NoCheckpoints(String),
}

/// Service-level errors (application specific)
#[derive(Debug, Error, Clone, Serialize)]
pub enum ServiceError {
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Patrol error: {0}")]
    Patrol(#[from] PatrolError),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<DbError> for ServiceError {
    fn from(error: DbError) -> Self {
        ServiceError::Domain(DomainError::Database(error))
    }
}

impl From<ValidationError> for ServiceError {
    fn from(error: ValidationError) -> Self {
        ServiceError::Domain(DomainError::Validation(error))
    }
}

/// Validation errors
#[derive(Debug, Error, Clone, PartialEq, Serialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required {
        field: String,
    },

    #[error("Field '{field}' must be between {min} and {max}")]
    Range {
        field: String,
        min: String,
        max: String,
    },

    #[error("Field '{field}' contains invalid format: {reason}")]
    Format {
        field: String,
        reason: String,
    },

    #[error("Field '{field}' contains an invalid value: {reason}")]
    InvalidValue {
        field: String,
        reason: String,
    },

    #[error("Validation error: {0}")]
    Custom(String),
}

impl ValidationError {
    pub fn required(field: &str) -> Self {
        Self::Required {
            field: field.to_string(),
        }
    }

    pub fn range<T: fmt::Display>(field: &str, min: T, max: T) -> Self {
        Self::Range {
            field: field.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    pub fn format(field: &str, reason: &str) -> Self {
        Self::Format {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_value(field: &str, reason: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn custom(message: &str) -> Self {
        Self::Custom(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SyncError::Timeout("t".into()).is_transient());
        assert!(SyncError::Transport("reset".into()).is_transient());
        assert!(SyncError::from_status(503, "down".into()).is_transient());
        assert!(!SyncError::from_status(400, "bad".into()).is_transient());
        assert!(!SyncError::Unauthorized.is_transient());
        assert!(!SyncError::CircuitOpen { endpoint: "x".into() }.is_transient());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(SyncError::from_status(401, String::new()), SyncError::Unauthorized));
        assert!(matches!(SyncError::from_status(422, String::new()), SyncError::Rejected { status: 422, .. }));
        assert!(SyncError::from_status(404, String::new()).is_authoritative_rejection());
    }
}
