//! Redis connectivity for the outbox store
//!
//! - `CircuitBreaker`: stops hammering Redis while it is unavailable
//! - `pool`: shared multiplexed connection plus typed command helpers

mod circuit_breaker;
pub mod pool;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use pool::{PoolError, RedisPool, RedisPoolExt};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
