//! Caller identity from the upstream gateway.
//!
//! Credentials are verified before requests reach this service; the gateway
//! forwards the authenticated user as the `X-User-Id` header. This layer
//! parses it into a [`CurrentUser`] request extension and rejects requests
//! without a usable id.

use crate::errors::QueueError;
use axum::{extract::Request, middleware::Next, response::IntoResponse};
use common::types::UserId;
use tracing::instrument;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller, inserted into request extensions by [`require_user`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub UserId);

fn extract_user_id(req: &Request) -> Result<UserId, QueueError> {
    let raw = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "qs.middleware.identity", "Missing X-User-Id header");
            QueueError::Unauthorized("Missing user identity".to_string())
        })?;

    raw.parse::<UserId>().map_err(|_| {
        tracing::debug!(target: "qs.middleware.identity", "Invalid X-User-Id header");
        QueueError::Unauthorized("Invalid user identity".to_string())
    })
}

/// Identity middleware for user-facing routes.
///
/// Returns 401 if the header is missing or not a positive integer.
#[instrument(skip_all, name = "qs.middleware.identity")]
pub async fn require_user(mut req: Request, next: Next) -> Result<impl IntoResponse, QueueError> {
    let user_id = extract_user_id(&req)?;
    req.extensions_mut().insert(CurrentUser(user_id));
    Ok(next.run(req).await)
}
