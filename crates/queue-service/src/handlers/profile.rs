//! Caller profile handlers.

use crate::errors::QueueError;
use crate::middleware::CurrentUser;
use crate::models::UserQueueItem;
use crate::routes::AppState;
use axum::{extract::State, Extension, Json};
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /api/v1/profile/queues
///
/// Active memberships of the caller, each with its queue window and the
/// event it belongs to.
#[instrument(skip_all, name = "qs.profile.queues", fields(user_id = %user_id))]
pub async fn my_queues(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Json<Vec<UserQueueItem>>, QueueError> {
    Ok(Json(state.ledger.user_queues(user_id).await?))
}
