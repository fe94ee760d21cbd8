//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    AUTO_DELETE_FAILURES_TOTAL, DEAD_LETTERED_TOTAL, DISPATCH_LATENCY, DISPATCH_OUTCOMES_TOTAL,
    QUEUE_DEPTH, RECORDS_ENQUEUED_TOTAL, RESCHEDULED_TOTAL, STALE_EDITS_PURGED_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct ProducerMetrics;

impl ProducerMetrics {
    pub fn record_enqueued(priority: &str) {
        RECORDS_ENQUEUED_TOTAL.with_label_values(&[priority]).inc();
    }
}

/// Helper struct for recording consumer-side metrics
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a classified dispatch outcome
    pub fn record_outcome(outcome: &str) {
        DISPATCH_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn record_rescheduled(reason: &str) {
        RESCHEDULED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_dead_lettered() {
        DEAD_LETTERED_TOTAL.inc();
    }

    pub fn record_latency(latency_secs: f64) {
        DISPATCH_LATENCY.observe(latency_secs);
    }

    pub fn record_auto_delete_failure() {
        AUTO_DELETE_FAILURES_TOTAL.inc();
    }
}

pub struct MaintenanceMetrics;

impl MaintenanceMetrics {
    pub fn record_purged(count: usize) {
        STALE_EDITS_PURGED_TOTAL.inc_by(count as u64);
    }
}

pub struct DepthMetrics;

impl DepthMetrics {
    pub fn set_depth(queue: &str, depth: usize) {
        QUEUE_DEPTH.with_label_values(&[queue]).set(depth as i64);
    }
}
