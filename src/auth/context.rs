use crate::errors::{ServiceError, ServiceResult};

/// Identity of the officer and device the current operation runs for.
///
/// Tokens are owned by the external sign-in flow; this core only needs to
/// know who is acting so records can be attributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// The ID of the authenticated user
    pub user_id: String,

    /// The ID of the current device
    pub device_id: String,
}

impl AuthContext {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
        }
    }

    /// Fails when no user is signed in.
    pub fn require_user(&self) -> ServiceResult<&str> {
        if self.user_id.trim().is_empty() {
            return Err(ServiceError::Authentication("No signed-in user".to_string()));
        }
        Ok(&self.user_id)
    }
}
