//! WebSocket endpoint for queue rooms.
//!
//! `GET /api/v1/queues/:id/ws` upgrades the connection and attaches it to
//! the room of that queue. The socket is receive-only from the client's
//! point of view: the server pushes room events and keepalive pings, and
//! inbound text is ignored.

use crate::errors::QueueError;
use crate::handlers::queues::parse_queue_id;
use crate::hub::ConnectionEndpoint;
use crate::middleware::CurrentUser;
use crate::routes::AppState;
use axum::{
    extract::{ws::WebSocket, Path, State, WebSocketUpgrade},
    response::Response,
    Extension,
};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Handler for GET /api/v1/queues/:id/ws
///
/// Rejects unknown queues with 404 before upgrading. Closed queues are
/// accepted; their room simply receives no further events.
#[instrument(skip_all, name = "qs.queue.ws", fields(queue_id = %raw_id, user_id = %user_id))]
pub async fn queue_socket(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(raw_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, QueueError> {
    let queue_id = parse_queue_id(&raw_id)?;
    if state.store.get_queue(queue_id).await?.is_none() {
        return Err(QueueError::NotFound);
    }

    let connection = state.config.connection.clone();
    let hub = state.hub.clone();

    debug!(
        target: "qs.handlers.ws",
        queue_id = %queue_id,
        user_id = %user_id,
        "Upgrading WebSocket connection"
    );

    Ok(ws
        .max_message_size(connection.max_message_bytes)
        .on_upgrade(move |socket: WebSocket| async move {
            let (writer, reader) = socket.split();
            ConnectionEndpoint::new(queue_id, hub, connection)
                .run(writer, reader)
                .await;
        }))
}
