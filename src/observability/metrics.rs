//! Metrics collection.
//!
//! # Responsibilities
//! - Define the engine's metrics (backlog, translations, errors, connections)
//! - Record them through the `metrics` facade
//!
//! # Metrics
//! - `proxy_backlog_enqueued_total` (counter)
//! - `proxy_backlog_dropped_total` (counter): writes dropped on a full backlog
//! - `proxy_backlog_released_total` (counter): writes released unsent
//! - `proxy_translations_total` (counter): by direction
//! - `proxy_protocol_errors_total` (counter): by kind
//! - `proxy_connect_failures_total` (counter)
//! - `proxy_transcoded_responses_total` (counter): by from, to
//! - `proxy_backend_connections` (gauge): live backend connections
//!
//! # Design Decisions
//! - No exporter is installed here; the embedding binary picks one
//! - Recording can be switched off from configuration

use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::ObservabilityConfig;

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Apply configuration and register metric descriptions.
pub fn init_metrics(config: &ObservabilityConfig) {
    ENABLED.store(config.metrics_enabled, Ordering::Relaxed);
    if !config.metrics_enabled {
        return;
    }
    metrics::describe_counter!(
        "proxy_backlog_enqueued_total",
        "Writes queued while a backend connection was negotiating"
    );
    metrics::describe_counter!(
        "proxy_backlog_dropped_total",
        "Writes dropped because the connection backlog was full"
    );
    metrics::describe_counter!(
        "proxy_backlog_released_total",
        "Queued writes released unsent when a connection failed or closed"
    );
    metrics::describe_counter!(
        "proxy_translations_total",
        "Messages translated or forwarded towards backends"
    );
    metrics::describe_counter!(
        "proxy_protocol_errors_total",
        "Connections closed on protocol errors"
    );
    metrics::describe_counter!(
        "proxy_connect_failures_total",
        "Backend connection attempts that failed or timed out"
    );
    metrics::describe_counter!(
        "proxy_transcoded_responses_total",
        "Response bodies re-encoded for the client"
    );
    metrics::describe_gauge!("proxy_backend_connections", "Live backend connections");
}

fn enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Record a write queued in a backlog.
pub fn record_backlog_enqueued() {
    if enabled() {
        metrics::counter!("proxy_backlog_enqueued_total").increment(1);
    }
}

/// Record a write dropped on a full backlog.
pub fn record_backlog_dropped() {
    if enabled() {
        metrics::counter!("proxy_backlog_dropped_total").increment(1);
    }
}

/// Record `count` queued writes released unsent.
pub fn record_backlog_released(count: usize) {
    if enabled() {
        metrics::counter!("proxy_backlog_released_total").increment(count as u64);
    }
}

/// Record a message sent towards a backend, labelled by direction.
pub fn record_translation(direction: &'static str) {
    if enabled() {
        metrics::counter!("proxy_translations_total", "direction" => direction).increment(1);
    }
}

/// Record a protocol error, labelled by kind.
pub fn record_protocol_error(kind: &'static str) {
    if enabled() {
        metrics::counter!("proxy_protocol_errors_total", "kind" => kind).increment(1);
    }
}

/// Record a failed backend connect.
pub fn record_connect_failure() {
    if enabled() {
        metrics::counter!("proxy_connect_failures_total").increment(1);
    }
}

/// Record a response body re-encoded from one coding to another.
pub fn record_transcoded_response(from: &'static str, to: &'static str) {
    if enabled() {
        metrics::counter!("proxy_transcoded_responses_total", "from" => from, "to" => to)
            .increment(1);
    }
}

/// Update the live backend connections gauge.
pub fn set_backend_connections(count: u64) {
    if enabled() {
        metrics::gauge!("proxy_backend_connections").set(count as f64);
    }
}
