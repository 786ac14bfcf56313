//! Queue membership handlers.
//!
//! - `POST /api/v1/queues/:id/join` - append the caller at the tail
//! - `POST /api/v1/queues/:id/leave` - remove the caller and compact
//! - `GET /api/v1/queues/:id/status` - ordered snapshot of the queue
//!
//! All three run behind the identity middleware.

use crate::errors::QueueError;
use crate::middleware::CurrentUser;
use crate::models::{JoinQueueResponse, LeaveQueueResponse, QueueSnapshot};
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use common::types::QueueId;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Parse the `:id` path segment.
pub(crate) fn parse_queue_id(raw: &str) -> Result<QueueId, QueueError> {
    raw.parse::<QueueId>().map_err(|_| {
        debug!(target: "qs.handlers.queues", queue_id = %raw, "Invalid queue id");
        QueueError::BadRequest("Invalid queue id".to_string())
    })
}

/// Handler for POST /api/v1/queues/:id/join
///
/// # Response
///
/// - 200 OK: `{message, position}`
/// - 400 Bad Request: invalid id, queue inactive, or already a member
/// - 404 Not Found: unknown queue
/// - 409 Conflict: queue full
#[instrument(skip_all, name = "qs.queue.join", fields(queue_id = %raw_id, user_id = %user_id))]
pub async fn join_queue(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(raw_id): Path<String>,
) -> Result<Json<JoinQueueResponse>, QueueError> {
    let queue_id = parse_queue_id(&raw_id)?;
    let position = state.ledger.join(queue_id, user_id).await?;

    debug!(
        target: "qs.handlers.queues",
        queue_id = %queue_id,
        user_id = %user_id,
        position,
        "User joined queue"
    );

    Ok(Json(JoinQueueResponse {
        message: "Joined queue".to_string(),
        position,
    }))
}

/// Handler for POST /api/v1/queues/:id/leave
///
/// # Response
///
/// - 200 OK: `{message, left_position}`
/// - 400 Bad Request: invalid id, or no active entry (unknown queues included)
#[instrument(skip_all, name = "qs.queue.leave", fields(queue_id = %raw_id, user_id = %user_id))]
pub async fn leave_queue(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(raw_id): Path<String>,
) -> Result<Json<LeaveQueueResponse>, QueueError> {
    let queue_id = parse_queue_id(&raw_id)?;
    let left_position = state.ledger.leave(queue_id, user_id).await?;

    debug!(
        target: "qs.handlers.queues",
        queue_id = %queue_id,
        user_id = %user_id,
        left_position,
        "User left queue"
    );

    Ok(Json(LeaveQueueResponse {
        message: "Left queue".to_string(),
        left_position,
    }))
}

/// Handler for GET /api/v1/queues/:id/status
#[instrument(skip_all, name = "qs.queue.status", fields(queue_id = %raw_id))]
pub async fn queue_status(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Json<QueueSnapshot>, QueueError> {
    let queue_id = parse_queue_id(&raw_id)?;
    Ok(Json(state.ledger.status(queue_id).await?))
}
