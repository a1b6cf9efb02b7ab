//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Registered workspaces and active subscriptions
//! - Write event delivery and projection recomputes
//! - Sync process lifecycle (started, stopped, disposed, failed)
//! - Coordinator state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `peer_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//!
//! Nothing is recorded unless the host installs a `metrics` recorder.
//!
//! # Usage
//!
//! ```rust,no_run
//! use reactive_peer::metrics;
//!
//! metrics::record_event_delivered("+gardening.abc");
//! metrics::record_sync_process_started("+gardening.abc", "https://pub.example");
//! ```

use metrics::{counter, gauge};
use std::time::Duration;

/// Gauge for the number of registered workspaces.
pub fn set_registered_workspaces(count: usize) {
    gauge!("peer_registered_workspaces").set(count as f64);
}

/// A subscription was opened.
pub fn record_subscription_opened() {
    counter!("peer_subscriptions_opened_total").increment(1);
    gauge!("peer_active_subscriptions").increment(1.0);
}

/// A subscription was closed.
pub fn record_subscription_closed() {
    gauge!("peer_active_subscriptions").decrement(1.0);
}

/// A write event passed a subscriber's filter.
pub fn record_event_delivered(workspace: &str) {
    counter!("peer_events_delivered_total", "workspace" => workspace.to_string()).increment(1);
}

/// A projection re-derived its value from storage.
pub fn record_projection_recompute(kind: &str, duration: Duration) {
    counter!("peer_projection_recomputes_total", "kind" => kind.to_string()).increment(1);
    gauge!("peer_projection_recompute_seconds", "kind" => kind.to_string()).set(duration.as_secs_f64());
}

/// A document write issued through a projection.
pub fn record_document_write(workspace: &str, outcome: &str) {
    counter!(
        "peer_document_writes_total",
        "workspace" => workspace.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// A sync process entered `Streaming`.
pub fn record_sync_process_started(workspace: &str, peer: &str) {
    counter!(
        "peer_sync_processes_started_total",
        "workspace" => workspace.to_string(),
        "peer" => peer.to_string()
    )
    .increment(1);
}

/// A sync process returned to `Idle`.
pub fn record_sync_process_stopped(workspace: &str, peer: &str) {
    counter!(
        "peer_sync_processes_stopped_total",
        "workspace" => workspace.to_string(),
        "peer" => peer.to_string()
    )
    .increment(1);
}

/// A sync process was dropped from the ownership table.
pub fn record_sync_process_disposed(workspace: &str) {
    counter!("peer_sync_processes_disposed_total", "workspace" => workspace.to_string()).increment(1);
}

/// A pair failed to start or was interrupted.
pub fn record_sync_failure(workspace: &str, peer: &str) {
    counter!(
        "peer_sync_failures_total",
        "workspace" => workspace.to_string(),
        "peer" => peer.to_string()
    )
    .increment(1);
}

/// Gauge for the number of streaming pairs.
pub fn set_streaming_processes(count: usize) {
    gauge!("peer_streaming_processes").set(count as f64);
}

/// One-shot sync with a single peer finished.
pub fn record_one_shot_sync(workspace: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "peer_one_shot_syncs_total",
        "workspace" => workspace.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Gauge for coordinator state.
pub fn set_coordinator_state(state: &str) {
    let value = match state {
        "Active" => 1.0,
        "Disposed" => 2.0,
        _ => -1.0,
    };
    gauge!("peer_coordinator_state").set(value);
}
