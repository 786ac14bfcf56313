//! Queue service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl.
//! Storage and internal failures return a generic message to clients;
//! the underlying error is logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Queue service error type.
///
/// Maps to HTTP status codes:
/// - NotFound: 404 Not Found
/// - Inactive, AlreadyMember, NotMember, BadRequest: 400 Bad Request
/// - QueueFull: 409 Conflict
/// - Unauthorized: 401 Unauthorized
/// - Storage, Transport, Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found")]
    NotFound,

    #[error("Queue is not active")]
    Inactive,

    #[error("User is already in this queue")]
    AlreadyMember,

    #[error("User has no active entry in this queue")]
    NotMember,

    #[error("Queue is full")]
    QueueFull,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            QueueError::NotFound => 404,
            QueueError::Inactive
            | QueueError::AlreadyMember
            | QueueError::NotMember
            | QueueError::BadRequest(_) => 400,
            QueueError::QueueFull => 409,
            QueueError::Unauthorized(_) => 401,
            QueueError::Storage(_) | QueueError::Transport(_) | QueueError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for the response body and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::NotFound => "QUEUE_NOT_FOUND",
            QueueError::Inactive => "QUEUE_INACTIVE",
            QueueError::AlreadyMember => "ALREADY_IN_QUEUE",
            QueueError::NotMember => "NOT_IN_QUEUE",
            QueueError::QueueFull => "QUEUE_FULL",
            QueueError::Storage(_) => "DB_ERROR",
            QueueError::Transport(_) => "TRANSPORT_ERROR",
            QueueError::BadRequest(_) => "INVALID_QUEUE_ID",
            QueueError::Unauthorized(_) => "UNAUTHORIZED",
            QueueError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for QueueError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match &self {
            QueueError::Storage(err) => {
                tracing::error!(target: "qs.storage", error = %err, "Storage operation failed");
                "An internal database error occurred".to_string()
            }
            QueueError::Transport(err) => {
                tracing::error!(target: "qs.transport", error = %err, "Transport failure");
                "An internal error occurred".to_string()
            }
            QueueError::Internal(err) => {
                tracing::error!(target: "qs.internal", error = %err, "Internal error");
                "An internal error occurred".to_string()
            }
            QueueError::BadRequest(reason) | QueueError::Unauthorized(reason) => reason.clone(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Convert sqlx errors to QueueError
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Storage(err.to_string())
    }
}

impl From<axum::Error> for QueueError {
    fn from(err: axum::Error) -> Self {
        QueueError::Transport(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(QueueError::NotFound.to_string(), "Queue not found");
        assert_eq!(QueueError::Inactive.to_string(), "Queue is not active");
        assert_eq!(
            QueueError::Storage("connection reset".to_string()).to_string(),
            "Storage error: connection reset"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(QueueError::NotFound.status_code(), 404);
        assert_eq!(QueueError::Inactive.status_code(), 400);
        assert_eq!(QueueError::AlreadyMember.status_code(), 400);
        assert_eq!(QueueError::NotMember.status_code(), 400);
        assert_eq!(QueueError::QueueFull.status_code(), 409);
        assert_eq!(QueueError::BadRequest("x".to_string()).status_code(), 400);
        assert_eq!(QueueError::Unauthorized("x".to_string()).status_code(), 401);
        assert_eq!(QueueError::Storage("x".to_string()).status_code(), 500);
        assert_eq!(QueueError::Transport("x".to_string()).status_code(), 500);
        assert_eq!(QueueError::Internal("x".to_string()).status_code(), 500);
    }

    #[tokio::test]
    async fn test_into_response_inactive() {
        let response = QueueError::Inactive.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "QUEUE_INACTIVE");
        assert_eq!(body["error"]["message"], "Queue is not active");
    }

    #[tokio::test]
    async fn test_into_response_storage_hides_details() {
        let response =
            QueueError::Storage("password authentication failed".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "DB_ERROR");
        assert_eq!(
            body["error"]["message"],
            "An internal database error occurred"
        );
    }

    #[tokio::test]
    async fn test_into_response_not_found() {
        let response = QueueError::NotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "QUEUE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_into_response_bad_request_keeps_reason() {
        let response = QueueError::BadRequest("Invalid queue id".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INVALID_QUEUE_ID");
        assert_eq!(body["error"]["message"], "Invalid queue id");
    }
}
