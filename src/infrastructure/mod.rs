//! Infrastructure layer modules
//!
//! - `config`: application configuration and settings
//! - `error`: crate-level error type
//! - `metrics`: Prometheus metrics helpers
//! - `redis`: Redis connection pool and circuit breaker
//! - `telemetry`: tracing subscriber setup

pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;
pub mod telemetry;
