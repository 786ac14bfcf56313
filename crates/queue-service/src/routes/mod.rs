//! HTTP routes for the queue service.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::hub::HubHandle;
use crate::ledger::PositionLedger;
use crate::middleware::{http_metrics_middleware, require_user};
use crate::repositories::QueueStore;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Request timeout for plain HTTP routes.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Persistent store for queues, entries and schedules.
    pub store: Arc<dyn QueueStore>,

    /// Membership rules and position assignment.
    pub ledger: Arc<PositionLedger>,

    /// Room broadcast sequencer.
    pub hub: HubHandle,

    /// Service configuration.
    pub config: Config,
}

/// Build the application routes.
///
/// - `/health`, `/ready`, `/metrics` - public, unversioned
/// - `/api/v1/queues/:id/{join,leave,status,ws}` - require `X-User-Id`
/// - `/api/v1/profile/queues` - requires `X-User-Id`
///
/// Layers, innermost first: request timeout (HTTP routes only), trace,
/// HTTP metrics. The WebSocket route is kept out of the timeout so
/// upgraded sessions are not cut after 30 seconds.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(Arc::clone(&state));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let user_routes = Router::new()
        .route("/api/v1/queues/:id/join", post(handlers::join_queue))
        .route("/api/v1/queues/:id/leave", post(handlers::leave_queue))
        .route("/api/v1/queues/:id/status", get(handlers::queue_status))
        .route("/api/v1/profile/queues", get(handlers::my_queues))
        .route_layer(middleware::from_fn(require_user))
        .with_state(Arc::clone(&state));

    let socket_routes = Router::new()
        .route("/api/v1/queues/:id/ws", get(handlers::queue_socket))
        .route_layer(middleware::from_fn(require_user))
        .with_state(state);

    public_routes
        .merge(metrics_routes)
        .merge(user_routes)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .merge(socket_routes)
        .layer(TraceLayer::new_for_http())
        // Outermost, so framework rejections (404, 405, 415) are counted too.
        .layer(middleware::from_fn(http_metrics_middleware))
}
