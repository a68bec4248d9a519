//! Prometheus metric definitions for the SFU signaling service.
//!
//! Naming follows Prometheus conventions:
//! - `sfu_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `request`: 4 values (get-rtp-capabilities, create-transport, produce, consume)
//! - `outcome`: 3 values (success, client_error, server_error)
//! - `actor_type`: 2 values (hub, connection)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metric is recorded; values recorded earlier go
/// to the no-op recorder.
///
/// # Errors
///
/// Returns error if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Signaling latency is dominated by engine calls (socket bind, etc.)
        .set_buckets_for_metric(
            Matcher::Prefix("sfu_signaling".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set signaling latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Metric: `sfu_connections_active`
pub fn set_connections_active(count: usize) {
    // usize to f64 is exact for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("sfu_connections_active").set(count as f64);
}

/// Metric: `sfu_producers_active`
///
/// Number of sessions currently publishing.
pub fn set_producers_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sfu_producers_active").set(count as f64);
}

// ============================================================================
// Signaling
// ============================================================================

/// Record the outcome and latency of one signaling request.
///
/// Metrics: `sfu_signaling_requests_total{request,outcome}`,
/// `sfu_signaling_latency_seconds{request}`
pub fn record_signaling_request(request: &'static str, outcome: &'static str, duration: Duration) {
    counter!(
        "sfu_signaling_requests_total",
        "request" => request,
        "outcome" => outcome
    )
    .increment(1);
    histogram!("sfu_signaling_latency_seconds", "request" => request)
        .record(duration.as_secs_f64());
}

/// Metric: `sfu_broadcast_dropped_total`
///
/// A `new-producer` push could not be queued for a recipient.
pub fn record_broadcast_dropped() {
    counter!("sfu_broadcast_dropped_total").increment(1);
}

/// Metric: `sfu_sessions_released_total`
pub fn record_session_released() {
    counter!("sfu_sessions_released_total").increment(1);
}

// ============================================================================
// Actors
// ============================================================================

/// Metric: `sfu_actor_panics_total{actor_type}`
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("sfu_actor_panics_total", "actor_type" => actor_type).increment(1);
}

/// Metric: `sfu_actor_mailbox_depth{actor_type}`
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sfu_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These run against the global no-op recorder (none installed in unit
    // tests); they exercise the label sets without asserting values.

    #[test]
    fn test_gauges() {
        set_connections_active(0);
        set_connections_active(250);
        set_producers_active(0);
        set_producers_active(12);
    }

    #[test]
    fn test_record_signaling_request() {
        for request in ["get-rtp-capabilities", "create-transport", "produce", "consume"] {
            for outcome in ["success", "client_error", "server_error"] {
                record_signaling_request(request, outcome, Duration::from_millis(3));
            }
        }
    }

    #[test]
    fn test_counters() {
        record_broadcast_dropped();
        record_session_released();
        record_actor_panic("hub");
        record_actor_panic("connection");
        set_actor_mailbox_depth("hub", 10);
        set_actor_mailbox_depth("connection", 1);
    }
}
