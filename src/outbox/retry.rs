//! Backoff schedules for rescheduled records.

use std::time::Duration;

use rand::Rng;

use crate::config::QueueSettings;

/// Delay calculator for the two retry paths.
///
/// Bounded failures back off `min(2^retry_count, max)` seconds. Network
/// failures back off `min(base * 2^previous_failures, max)` seconds, with
/// optional symmetric jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Cap applied to both schedules
    pub max_backoff: Duration,
    /// First transient delay
    pub transient_base: Duration,
    /// Jitter factor (0.0 to 1.0) for transient delays
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_backoff: Duration::from_secs(300),
            transient_base: Duration::from_secs(30),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            max_backoff: Duration::from_secs(settings.max_backoff_secs),
            transient_base: Duration::from_secs(settings.transient_base_delay_secs),
            jitter_factor: settings.transient_jitter.clamp(0.0, 1.0),
        }
    }

    /// Delay after the `retry_count`-th bounded failure.
    pub fn bounded_delay(&self, retry_count: u32) -> Duration {
        let secs = 2u64.checked_pow(retry_count).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.max_backoff)
    }

    /// Delay after a network failure preceded by `previous_failures` others.
    pub fn transient_delay(&self, previous_failures: u32) -> Duration {
        let factor = 2u32.checked_pow(previous_failures).unwrap_or(u32::MAX);
        let capped = self
            .transient_base
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);

        if self.jitter_factor > 0.0 {
            let capped_ms = capped.as_millis() as f64;
            let jitter_range = capped_ms * self.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
            let jittered = (capped_ms + jitter).clamp(0.0, self.max_backoff.as_millis() as f64);
            Duration::from_millis(jittered as u64)
        } else {
            capped
        }
    }
}
