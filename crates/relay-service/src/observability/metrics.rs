//! Metrics definitions for the signaling relay.
//!
//! All metrics follow Prometheus naming conventions:
//! - `relay_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Every label value comes from a fixed set:
//! - `role`: presenter, viewer
//! - `direction`: `to_viewer`, `to_presenter`
//! - `kind`: offer, answer, candidate
//! - `reason` (rooms): ended, evicted
//! - `reason` (delivery): closed, backpressure

use crate::rooms::{EnvelopeKind, Role};
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
        // Sweeps hold the registry lock; they should stay well under 10ms
        .set_buckets_for_metric(
            Matcher::Prefix("relay_eviction_sweep".to_string()),
            &[
                0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250,
            ],
        )
        .map_err(|e| format!("Failed to set eviction sweep buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Direction label for a message addressed to `destination`.
const fn direction_label(destination: Role) -> &'static str {
    match destination {
        Role::Presenter => "to_presenter",
        Role::Viewer => "to_viewer",
    }
}

// ============================================================================
// Room Metrics
// ============================================================================

/// Set the number of active rooms.
///
/// Metric: `relay_rooms_active`
pub fn set_rooms_active(count: usize) {
    // usize to f64 conversion is safe for realistic room counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_rooms_active").set(count as f64);
}

/// Record a room being created.
///
/// Metric: `relay_rooms_created_total`
pub fn record_room_created() {
    counter!("relay_rooms_created_total").increment(1);
}

/// Record a room being removed.
///
/// Metric: `relay_rooms_removed_total`
/// Labels: `reason` (ended, evicted)
pub fn record_room_removed(reason: &'static str) {
    counter!("relay_rooms_removed_total", "reason" => reason).increment(1);
}

// ============================================================================
// Connection Metrics
// ============================================================================

/// Record a signaling connection joining its slot.
///
/// Metric: `relay_connections_active`
/// Labels: `role`
pub fn record_connection_opened(role: Role) {
    gauge!("relay_connections_active", "role" => role.as_str()).increment(1.0);
}

/// Record a signaling connection leaving its read loop.
///
/// Metric: `relay_connections_active`
/// Labels: `role`
pub fn record_connection_closed(role: Role) {
    gauge!("relay_connections_active", "role" => role.as_str()).decrement(1.0);
}

// ============================================================================
// Message Metrics
// ============================================================================

/// Record a message delivered live to `destination`.
///
/// Metric: `relay_messages_relayed_total`
/// Labels: `direction`, `kind`
pub fn record_message_relayed(destination: Role, kind: EnvelopeKind) {
    counter!(
        "relay_messages_relayed_total",
        "direction" => direction_label(destination),
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a message buffered for an absent `destination`.
///
/// Metric: `relay_messages_buffered_total`
/// Labels: `direction`
pub fn record_message_buffered(destination: Role) {
    counter!(
        "relay_messages_buffered_total",
        "direction" => direction_label(destination)
    )
    .increment(1);
}

/// Record a buffered message dropped because the pending queue was full.
///
/// Metric: `relay_messages_dropped_total`
/// Labels: `direction`
pub fn record_message_dropped(destination: Role) {
    counter!(
        "relay_messages_dropped_total",
        "direction" => direction_label(destination)
    )
    .increment(1);
}

/// Record a failed send to a peer connection.
///
/// Metric: `relay_delivery_failures_total`
/// Labels: `reason` (closed, backpressure)
pub fn record_delivery_failure(reason: &'static str) {
    counter!("relay_delivery_failures_total", "reason" => reason).increment(1);
}

// ============================================================================
// Eviction Metrics
// ============================================================================

/// Record one eviction sweep pass.
///
/// Metric: `relay_eviction_sweep_duration_seconds`
pub fn record_eviction_sweep(duration: Duration) {
    histogram!("relay_eviction_sweep_duration_seconds").record(duration.as_secs_f64());
}
