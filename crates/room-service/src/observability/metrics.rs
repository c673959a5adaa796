//! Metrics definitions for the room service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rs_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `actor_type`: 2 values (controller, conversation)
//! - `backend`: 3 values (signaling, recording, federation)
//! - `outcome`: 4 values (success, not_found, rejected, unavailable)
//! - `event`: 10 values, one per domain event kind
//!
//! Conversation tokens are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Backend request buckets cover a fast local signaling server up to the
/// configured request timeout.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("rs_backend_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set backend request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Set the number of conversation actors currently running.
///
/// Metric: `rs_conversations_loaded`
pub fn set_conversations_loaded(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rs_conversations_loaded").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `rs_actor_mailbox_depth`
/// Labels: `actor_type` (controller, conversation)
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rs_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// Record an event handed to every listener.
///
/// Metric: `rs_events_dispatched_total`
/// Labels: `event`
pub fn record_event_dispatched(event: &'static str) {
    counter!("rs_events_dispatched_total", "event" => event).increment(1);
}

/// Record sessions closed by the sweeper.
///
/// Metric: `rs_sessions_expired_total`
pub fn record_sessions_expired(count: usize) {
    counter!("rs_sessions_expired_total").increment(count as u64);
}

/// Record a federated attendee removed because its remote share is gone.
///
/// Metric: `rs_federation_attendees_removed_total`
pub fn record_federation_attendee_removed() {
    counter!("rs_federation_attendees_removed_total").increment(1);
}

// ============================================================================
// Backend requests
// ============================================================================

/// Record one backend notification, after all retries.
///
/// Metrics: `rs_backend_requests_total`, `rs_backend_request_duration_seconds`
/// Labels: `backend`, `outcome` (counter only)
pub fn record_backend_request(backend: &'static str, outcome: &'static str, duration: Duration) {
    counter!("rs_backend_requests_total", "backend" => backend, "outcome" => outcome)
        .increment(1);
    histogram!("rs_backend_request_duration_seconds", "backend" => backend)
        .record(duration.as_secs_f64());
}
