use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use super::circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState};
use super::retry::RetryPolicy;
use crate::domains::core::clock::Clock;
use crate::errors::{RemoteResult, SyncError};

/// Wraps every outbound remote call: retry with backoff on the outside,
/// a per-endpoint circuit breaker around each individual attempt.
pub struct ResilientExecutor {
    retry: RetryPolicy,
    breaker_config: BreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    attempts: AtomicU64,
}

impl ResilientExecutor {
    pub fn new(retry: RetryPolicy, breaker_config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            retry,
            breaker_config,
            clock,
            breakers: Mutex::new(HashMap::new()),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn breaker(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(endpoint, self.breaker_config, self.clock.clone()))
            })
            .clone()
    }

    pub fn circuit_state(&self, endpoint: &str) -> CircuitState {
        self.breaker(endpoint).state()
    }

    /// Number of calls that actually went out since creation.
    pub fn attempt_count(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Run `operation` against `endpoint`.
    ///
    /// An open circuit fails fast with `SyncError::CircuitOpen` and is not
    /// retried. If the circuit opens between retries, the last real error is
    /// returned instead so the caller still counts that attempt.
    /// Cancellation aborts both an in-flight call and a backoff sleep.
    pub async fn execute<T, F, Fut>(
        &self,
        endpoint: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let breaker = self.breaker(endpoint);
        let mut attempt: u32 = 0;
        let mut last_err: Option<SyncError> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if let Err(open) = breaker.try_acquire() {
                return Err(last_err.unwrap_or(open));
            }
            self.attempts.fetch_add(1, Ordering::SeqCst);

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(SyncError::Cancelled),
                result = operation() => result,
            };
            breaker.record_outcome(&outcome);

            match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        log::info!("Call to '{}' succeeded after {} retries", endpoint, attempt);
                    }
                    return Ok(value);
                }
                Err(err) if self.retry.should_retry(attempt, &err) => {
                    let delay = self.retry.delay_for(attempt);
                    log::warn!(
                        "Transient error calling '{}' (attempt {}), retrying in {:?}: {}",
                        endpoint, attempt + 1, delay, err
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    last_err = Some(err);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
