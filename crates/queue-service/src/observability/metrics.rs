//! Metrics definitions for the queue service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `qs_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `endpoint`: parameterized paths, unknown paths collapse to `/other`
//! - `status`: success, error, timeout
//! - `operation`: join, leave, status
//! - `job`: the four scheduler job names
//! - `event_type`, `reason`: fixed enums in the hub
//!
//! Queue ids and user ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle that renders the
/// scrape output.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("qs_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("qs_ledger_operation".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set ledger operation buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("qs_job_duration".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000],
        )
        .map_err(|e| format!("Failed to set job duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `qs_http_requests_total`, `qs_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("qs_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("qs_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 | 101 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Map a request path to a bounded label value.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/" | "/health" | "/ready" | "/metrics" | "/api/v1/profile/queues" => path.to_string(),
        _ => normalize_queue_endpoint(path),
    }
}

/// `/api/v1/queues/{id}/{action}` for the known actions, `/other` otherwise.
fn normalize_queue_endpoint(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if let ["", "api", "v1", "queues", _id, action] = parts.as_slice() {
        if matches!(*action, "join" | "leave" | "status" | "ws") {
            return format!("/api/v1/queues/{{id}}/{action}");
        }
    }
    "/other".to_string()
}

// ============================================================================
// Ledger Metrics
// ============================================================================

/// Record a ledger operation.
///
/// Metric: `qs_ledger_operations_total`, `qs_ledger_operation_duration_seconds`
/// Labels: `operation`, `outcome` (`ok` or an error code)
pub fn record_ledger_operation(operation: &'static str, outcome: &'static str, duration: Duration) {
    histogram!("qs_ledger_operation_duration_seconds",
        "operation" => operation
    )
    .record(duration.as_secs_f64());

    counter!("qs_ledger_operations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

// ============================================================================
// Hub Metrics
// ============================================================================

/// Metric: `qs_ws_connections` (gauge)
pub fn set_ws_connections(count: usize) {
    gauge!("qs_ws_connections").set(count as f64);
}

/// Metric: `qs_broadcasts_total`, `qs_broadcast_frames_total`
/// Labels: `event_type`
pub fn record_broadcast(event_type: &'static str, delivered: usize) {
    counter!("qs_broadcasts_total", "event_type" => event_type).increment(1);
    counter!("qs_broadcast_frames_total", "event_type" => event_type)
        .increment(delivered as u64);
}

/// Metric: `qs_ws_evictions_total`
/// Labels: `reason`
pub fn record_eviction(reason: &'static str) {
    counter!("qs_ws_evictions_total", "reason" => reason).increment(1);
}

/// Metric: `qs_ws_connections_closed_total`
/// Labels: `reason`
pub fn record_connection_closed(reason: &'static str) {
    counter!("qs_ws_connections_closed_total", "reason" => reason).increment(1);
}

// ============================================================================
// Scheduler Metrics
// ============================================================================

/// Record one scheduler tick.
///
/// Metric: `qs_job_runs_total`, `qs_job_duration_seconds`
/// Labels: `job`, `status` (success, error, timeout)
pub fn record_job_run(job: &'static str, status: &'static str, duration: Duration) {
    histogram!("qs_job_duration_seconds", "job" => job).record(duration.as_secs_f64());
    counter!("qs_job_runs_total", "job" => job, "status" => status).increment(1);
}

/// Metric: `qs_job_items_total`
/// Labels: `job`
pub fn record_job_items(job: &'static str, items: u64) {
    counter!("qs_job_items_total", "job" => job).increment(items);
}
