//! Circuit breaker guarding outbox store commands

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use super::current_time_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Commands flow through normally
    Closed,
    /// Commands are rejected without touching Redis
    Open,
    /// Probe commands are allowed through
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 30_000,
        }
    }
}

/// Circuit breaker for the Redis connection used by the outbox.
///
/// The consumer loop polls the store continuously; when Redis is down the
/// breaker turns every poll into a cheap local rejection until the reset
/// timeout elapses.
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    probe_successes: AtomicU32,
    /// Epoch millis when the circuit opened, 0 while closed
    opened_at_ms: AtomicI64,
    probing: AtomicBool,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            probe_successes: AtomicU32::new(0),
            opened_at_ms: AtomicI64::new(0),
            probing: AtomicBool::new(false),
            config,
        }
    }

    pub fn state(&self) -> CircuitState {
        let opened_at = self.opened_at_ms.load(Ordering::Acquire);
        if opened_at == 0 {
            return CircuitState::Closed;
        }
        if self.probing.load(Ordering::Acquire) {
            return CircuitState::HalfOpen;
        }
        if current_time_ms() - opened_at >= self.config.reset_timeout_ms as i64 {
            if !self.probing.swap(true, Ordering::AcqRel) {
                self.probe_successes.store(0, Ordering::Release);
                tracing::info!("Store circuit breaker half-open, probing Redis");
            }
            return CircuitState::HalfOpen;
        }
        CircuitState::Open
    }

    pub fn allow_request(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                let successes = self.probe_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold {
                    self.close();
                    tracing::info!("Store circuit breaker closed after recovery");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.open();
                    tracing::warn!(failures, "Store circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                self.open();
                tracing::warn!("Store circuit breaker reopened, probe failed");
            }
            CircuitState::Open => {
                self.opened_at_ms.store(current_time_ms(), Ordering::Release);
            }
        }
    }

    fn open(&self) {
        self.probing.store(false, Ordering::Release);
        self.probe_successes.store(0, Ordering::Release);
        self.opened_at_ms.store(current_time_ms(), Ordering::Release);
    }

    fn close(&self) {
        self.probing.store(false, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.probe_successes.store(0, Ordering::Release);
        self.opened_at_ms.store(0, Ordering::Release);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
