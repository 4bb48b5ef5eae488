use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domains::core::clock::Clock;
use crate::errors::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive transient failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before one trial call is admitted.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

/// Fail-fast guard for one logical endpoint.
///
/// Closed -> Open after `failure_threshold` consecutive failures. Open rejects
/// without calling out until `reset_timeout` has elapsed, then admits exactly
/// one trial (HalfOpen). The trial's outcome closes or re-opens the circuit.
pub struct CircuitBreaker {
    endpoint: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(endpoint: &str, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Ask permission to make one call.
    pub fn try_acquire(&self) -> Result<(), SyncError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let reset_timeout = chrono::Duration::from_std(self.config.reset_timeout)
                    .unwrap_or(chrono::Duration::MAX);
                let elapsed = inner
                    .opened_at
                    .map(|opened| self.clock.now() - opened >= reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    log::info!("Circuit for '{}' half-open, admitting trial call", self.endpoint);
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(())
                } else {
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(self.open_error())
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            log::info!("Circuit for '{}' closed", self.endpoint);
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let now = self.clock.now();
        match inner.state {
            CircuitState::HalfOpen => {
                log::warn!("Trial call for '{}' failed, circuit re-opened", self.endpoint);
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.trial_in_flight = false;
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    log::warn!(
                        "Circuit for '{}' opened after {} consecutive failures",
                        self.endpoint, inner.consecutive_failures
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                }
            }
            CircuitState::Open => {
                inner.opened_at = Some(now);
            }
        }
    }

    /// Give back an admitted call that never produced an outcome, e.g. on cancellation.
    pub fn release(&self) {
        self.lock().trial_in_flight = false;
    }

    /// Feed a call result into the breaker. Only transient errors count as failures;
    /// any answer from the remote, even a rejection, proves the endpoint is up.
    pub fn record_outcome<T>(&self, outcome: &Result<T, SyncError>) {
        match outcome {
            Ok(_) => self.record_success(),
            Err(e) if e.is_transient() => self.record_failure(),
            Err(SyncError::Cancelled) | Err(SyncError::Local(_)) | Err(SyncError::CircuitOpen { .. }) => self.release(),
            Err(_) => self.record_success(),
        }
    }

    fn open_error(&self) -> SyncError {
        SyncError::CircuitOpen { endpoint: self.endpoint.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::core::clock::FakeClock;
    use chrono::TimeZone;

    fn breaker(clock: Arc<FakeClock>) -> CircuitBreaker {
        CircuitBreaker::new(
            "reports",
            BreakerConfig { failure_threshold: 3, reset_timeout: Duration::from_secs(30) },
            clock,
        )
    }

    fn clock() -> Arc<FakeClock> {
        Arc::new(FakeClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()))
    }

    #[test]
    fn test_opens_after_threshold() {
        let clock = clock();
        let breaker = breaker(clock.clone());
        for _ in 0..2 {
            breaker.try_acquire().unwrap();
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.try_acquire().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(breaker.try_acquire(), Err(SyncError::CircuitOpen { .. })));
    }

    #[test]
    fn test_exactly_one_trial_after_reset_timeout() {
        let clock = clock();
        let breaker = breaker(clock.clone());
        for _ in 0..3 {
            breaker.record_failure();
        }

        clock.advance(chrono::Duration::seconds(29));
        assert!(breaker.try_acquire().is_err());

        clock.advance(chrono::Duration::seconds(1));
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().is_err());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn test_failed_trial_reopens_and_restarts_timeout() {
        let clock = clock();
        let breaker = breaker(clock.clone());
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance(chrono::Duration::seconds(30));
        breaker.try_acquire().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(chrono::Duration::seconds(20));
        assert!(breaker.try_acquire().is_err());
        clock.advance(chrono::Duration::seconds(10));
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_rejections_do_not_count_as_failures() {
        let breaker = breaker(clock());
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_outcome::<()>(&Err(SyncError::from_status(422, "bad".into())));
        assert_eq!(breaker.consecutive_failures(), 0);

        breaker.record_outcome::<()>(&Err(SyncError::Timeout("slow".into())));
        assert_eq!(breaker.consecutive_failures(), 1);
    }

    #[test]
    fn test_released_trial_can_be_retaken() {
        let clock = clock();
        let breaker = breaker(clock.clone());
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance(chrono::Duration::seconds(31));
        breaker.try_acquire().unwrap();
        breaker.record_outcome::<()>(&Err(SyncError::Cancelled));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().is_ok());
    }
}
