//! Metrics definitions for the signaling service
//!
//! All metrics follow Prometheus naming conventions:
//! - `sig_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `actor_type`: 2 values (manager, room)
//! - `message_type`: bounded by the wire protocol (~10 values)
//! - `reason`: bounded by `ErrorReason` and `CloseReason`
//!
//! Room and user identifiers are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded. Message latency buckets
/// target a p99 below 10ms, since handling is in-memory fan-out only.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("sig_message".to_string()),
            &[
                0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.010, 0.025, 0.050, 0.100,
            ],
        )
        .map_err(|e| format!("Failed to set message latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Connection & Room Metrics (Gauges)
// ============================================================================

/// Set the number of open client connections.
///
/// Metric: `sig_connections_active`
/// Labels: none
pub fn set_connections_active(count: u64) {
    // u64 to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("sig_connections_active").set(count as f64);
}

/// Set the number of open rooms.
///
/// Metric: `sig_rooms_active`
/// Labels: none
pub fn set_rooms_active(count: u64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sig_rooms_active").set(count as f64);
}

/// Set the number of participants across all rooms.
///
/// Metric: `sig_participants_active`
/// Labels: none
pub fn set_participants_active(count: u64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sig_participants_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `sig_actor_mailbox_depth`
/// Labels: `actor_type` (manager, room)
///
/// High values indicate the actor is falling behind in message processing.
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    // usize to f64 conversion is safe for realistic mailbox depths
    #[allow(clippy::cast_precision_loss)]
    gauge!("sig_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Message Metrics
// ============================================================================

/// Record a handled inbound message.
///
/// Metric: `sig_messages_total`
/// Labels: `message_type`
pub fn record_message(message_type: &'static str) {
    counter!("sig_messages_total", "message_type" => message_type).increment(1);
}

/// Record inbound message handling latency.
///
/// Metric: `sig_message_latency_seconds`
/// Labels: `message_type`
///
/// Covers dispatch through the room actor, including relay fan-out, but
/// not delivery to the remote socket.
pub fn record_message_latency(message_type: &'static str, duration: Duration) {
    histogram!("sig_message_latency_seconds", "message_type" => message_type)
        .record(duration.as_secs_f64());
}

/// Record an error reported to a client.
///
/// Metric: `sig_errors_total`
/// Labels: `reason` (wire error code)
pub fn record_error(reason: &'static str) {
    counter!("sig_errors_total", "reason" => reason).increment(1);
}

/// Record an outbound message dropped because a client's queue was full.
///
/// Metric: `sig_messages_dropped_total`
/// Labels: none
///
/// Each drop force-closes the slow connection.
pub fn record_message_dropped() {
    counter!("sig_messages_dropped_total").increment(1);
}

/// Record a closed connection.
///
/// Metric: `sig_connections_closed_total`
/// Labels: `reason` (client_closed, idle_timeout, transport_error,
/// force_closed, internal_error, server_shutting_down)
pub fn record_connection_closed(reason: &'static str) {
    counter!("sig_connections_closed_total", "reason" => reason).increment(1);
}

// ============================================================================
// Actor Health
// ============================================================================

/// Record an actor panic event.
///
/// Metric: `sig_actor_panics_total`
/// Labels: `actor_type`
///
/// ALERT: Any non-zero value indicates a bug and should trigger investigation.
pub fn record_actor_panic(actor_type: &str) {
    counter!("sig_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}
