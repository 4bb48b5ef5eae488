pub mod circuit_breaker;
pub mod executor;
pub mod retry;

pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use executor::ResilientExecutor;
pub use retry::RetryPolicy;
