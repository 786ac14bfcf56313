//! Health check handlers.
//!
//! - `/health`: liveness, returns OK while the process is running
//! - `/ready`: readiness, checks the store and the hub sequencer

use crate::models::ReadinessResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

/// Liveness probe handler. Checks no dependencies.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe handler.
///
/// Returns 200 when the store answers a ping and the hub actor is running,
/// 503 otherwise. Failure details are logged, not returned.
#[tracing::instrument(skip_all, name = "qs.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(target: "qs.handlers.health", error = %e, "Readiness check failed: store unavailable");
            false
        }
    };

    let hub = match state.hub.status().await {
        Ok(status) => Some(status),
        Err(e) => {
            tracing::warn!(target: "qs.handlers.health", error = %e, "Readiness check failed: hub not running");
            None
        }
    };

    let ready = database && hub.is_some();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            status: if ready { "ready" } else { "not_ready" }.to_string(),
            database: health_label(database).to_string(),
            hub: health_label(hub.is_some()).to_string(),
            connections: hub.map(|s| s.connections),
        }),
    )
}

fn health_label(healthy: bool) -> &'static str {
    if healthy {
        "healthy"
    } else {
        "unhealthy"
    }
}
