//! HTTP middleware for the queue service.
//!
//! - `identity` - trusted `X-User-Id` header to [`CurrentUser`]
//! - `http_metrics` - request metrics for every response

pub mod http_metrics;
pub mod identity;

pub use http_metrics::http_metrics_middleware;
pub use identity::{require_user, CurrentUser, USER_ID_HEADER};
