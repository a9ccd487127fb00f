//! Metrics definitions for the Session Router.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sr_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `action`: the 8 signaling actions plus `invalid` for undecodable frames
//! - `class`: 6 error classes
//! - `operation`: 7 engine operations
//! - `actor_type`: 2 values (registry, room)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("sr_message".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set message latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Room, Peer & Connection Metrics (Gauges)
// ============================================================================

/// Metric: `sr_rooms_active`
pub fn set_rooms_active(count: usize) {
    // usize to f64 conversion is safe for realistic room counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("sr_rooms_active").set(count as f64);
}

/// Metric: `sr_peers_active`
pub fn set_peers_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sr_peers_active").set(count as f64);
}

/// Set the number of open signaling connections.
///
/// Metric: `sr_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sr_connections_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `sr_actor_mailbox_depth`
/// Labels: `actor_type` (registry, room)
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sr_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Latency Metrics (Histograms)
// ============================================================================

/// Record signaling action handling latency, engine calls included.
///
/// Metric: `sr_message_latency_seconds`
/// Labels: `action`
pub fn record_message_latency(action: &str, duration: Duration) {
    histogram!("sr_message_latency_seconds", "action" => action.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Counters
// ============================================================================

/// Record an error reply.
///
/// Metric: `sr_errors_total`
/// Labels: `action`, `class`
pub fn record_error(action: &str, class: &str) {
    counter!(
        "sr_errors_total",
        "action" => action.to_string(),
        "class" => class.to_string()
    )
    .increment(1);
}

/// Record a media engine call outcome.
///
/// Metric: `sr_engine_operations_total`
/// Labels: `operation`, `status` (success, error)
pub fn record_engine_operation(operation: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        "sr_engine_operations_total",
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // These execute the recording functions against the global no-op
    // recorder; values are checked in the snapshot test below.

    #[test]
    fn test_gauges() {
        set_rooms_active(0);
        set_rooms_active(12);
        set_peers_active(40);
        set_connections_active(41);
        set_actor_mailbox_depth("registry", 0);
        set_actor_mailbox_depth("room", 150);
    }

    #[test]
    fn test_record_message_latency() {
        record_message_latency("joinRoom", Duration::from_millis(3));
        record_message_latency("consume", Duration::from_millis(40));
        record_message_latency("invalid", Duration::from_micros(50));
    }

    #[test]
    fn test_record_error() {
        record_error("consume", "state");
        record_error("connectTransport", "not_found");
        record_error("invalid", "protocol");
    }

    #[test]
    fn test_record_engine_operation() {
        record_engine_operation("produce", true);
        record_engine_operation("consume", false);
    }

    #[test]
    fn test_metrics_are_captured_by_recorder() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_rooms_active(3);
            record_error("consume", "state");
            record_error("consume", "state");
            record_engine_operation("produce", true);
            record_message_latency("produce", Duration::from_millis(5));
        });

        let metrics = snapshotter.snapshot().into_vec();

        let errors = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "sr_errors_total")
            .expect("sr_errors_total should be recorded");
        assert!(matches!(errors.3, DebugValue::Counter(2)));

        let labels: Vec<_> = errors
            .0
            .key()
            .labels()
            .map(|l| (l.key().to_string(), l.value().to_string()))
            .collect();
        assert!(labels.contains(&("class".to_string(), "state".to_string())));

        assert!(metrics
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "sr_rooms_active"));
        assert!(metrics
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "sr_engine_operations_total"));
        assert!(metrics
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "sr_message_latency_seconds"));
    }
}
