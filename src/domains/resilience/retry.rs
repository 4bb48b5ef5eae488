use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::SyncError;

/// Exponential backoff for transient remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay }
    }

    /// `base * 2^attempt`, where `attempt` is the zero based index of the failed try.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }

    /// Whether a failure on `attempt` should be followed by another try.
    pub fn should_retry(&self, attempt: u32, error: &SyncError) -> bool {
        attempt < self.max_retries && error.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert!(policy.delay_for(40) > Duration::from_secs(3600));
    }

    #[test]
    fn test_only_transient_errors_are_retried() {
        let policy = RetryPolicy::default();
        let timeout = SyncError::Timeout("slow".into());
        assert!(policy.should_retry(0, &timeout));
        assert!(policy.should_retry(2, &timeout));
        assert!(!policy.should_retry(3, &timeout));
        assert!(!policy.should_retry(0, &SyncError::from_status(422, "invalid".into())));
        assert!(!policy.should_retry(0, &SyncError::Unauthorized));
    }
}
