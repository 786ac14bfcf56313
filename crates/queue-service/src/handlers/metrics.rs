//! Prometheus scrape endpoint.
//!
//! Unauthenticated. Labels carry no user or queue identifiers.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for GET /metrics.
#[tracing::instrument(skip_all, name = "qs.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
