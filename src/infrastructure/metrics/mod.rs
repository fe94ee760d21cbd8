//! Prometheus metrics for the outbox.
//!
//! - Producer metrics (records enqueued per priority)
//! - Consumer metrics (dispatch outcomes, reschedules, dead letters, latency)
//! - Depth gauges refreshed by `queue_stats`

mod helpers;

pub use helpers::{encode_metrics, DepthMetrics, DispatchMetrics, MaintenanceMetrics, ProducerMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "outbox";

lazy_static! {
    /// Records pushed to a priority bucket, by priority
    pub static ref RECORDS_ENQUEUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_records_enqueued_total", METRIC_PREFIX),
        "Records pushed to a priority bucket",
        &["priority"]
    ).unwrap();

    /// Dispatch attempts by classified outcome
    pub static ref DISPATCH_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_dispatch_outcomes_total", METRIC_PREFIX),
        "Dispatch attempts by classified outcome",
        &["outcome"]
    ).unwrap();

    /// Records moved to the delayed set, by reason
    pub static ref RESCHEDULED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_rescheduled_total", METRIC_PREFIX),
        "Records moved to the delayed set",
        &["reason"]
    ).unwrap();

    pub static ref DEAD_LETTERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_dead_lettered_total", METRIC_PREFIX),
        "Records moved to the dead-letter bucket"
    ).unwrap();

    pub static ref STALE_EDITS_PURGED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_stale_edits_purged_total", METRIC_PREFIX),
        "Edit records discarded by the startup purge"
    ).unwrap();

    pub static ref AUTO_DELETE_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_auto_delete_failures_total", METRIC_PREFIX),
        "Auto-delete calls that failed"
    ).unwrap();

    /// Current depth per structure (urgent/high/normal/low/delayed/dead_letter)
    pub static ref QUEUE_DEPTH: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_queue_depth", METRIC_PREFIX),
        "Records currently held, by structure",
        &["queue"]
    ).unwrap();

    /// Chat API call latency in seconds
    pub static ref DISPATCH_LATENCY: Histogram = register_histogram!(
        format!("{}_dispatch_latency_seconds", METRIC_PREFIX),
        "Chat API call latency for one dispatch",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();
}
