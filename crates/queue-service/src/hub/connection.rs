//! Connection endpoint - one live WebSocket session attached to a room.
//!
//! The endpoint registers a bounded outbound mailbox with the hub, then runs
//! two loops until either side ends:
//!
//! - inbound: reads client frames under an idle deadline that any received
//!   frame (pong included) renews; client text is logged and ignored
//! - outbound: drains the mailbox into the socket under a write deadline and
//!   pings on a fixed interval
//!
//! Both loops share a cancellation token. Whichever stops first cancels the
//! other, and the endpoint then unregisters from the hub exactly once.
//!
//! The loops are generic over the socket halves so they can be driven by
//! in-memory channels in tests.

use super::actor::HubHandle;
use super::messages::OutboundFrame;
use crate::config::ConnectionConfig;
use crate::observability::metrics as prom;

use axum::extract::ws::Message;
use common::types::{ConnectionId, QueueId};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Lifecycle of a connection endpoint.
///
/// `Connecting -> Registered -> Closing -> Closed`. `Closing` and `Closed`
/// are reachable from any state; `Closed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Registered,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Apply a transition, ignoring ones the state machine does not allow.
    #[must_use]
    pub fn advance(self, next: ConnectionState) -> ConnectionState {
        match (self, next) {
            (ConnectionState::Closed, _) => ConnectionState::Closed,
            (ConnectionState::Connecting, ConnectionState::Registered)
            | (_, ConnectionState::Closing | ConnectionState::Closed) => next,
            _ => self,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Registered => "registered",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame or the stream ended.
    ClientClosed,
    /// Reading from the socket failed.
    TransportError,
    /// No frame received within the read timeout.
    IdleTimeout,
    /// Client frame exceeded the inbound size limit.
    MessageTooLarge,
    /// The hub dropped the outbound mailbox.
    Evicted,
    /// A write missed its deadline or failed.
    WriteFailed,
    /// Service shutdown.
    Shutdown,
}

impl CloseReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientClosed => "client_closed",
            CloseReason::TransportError => "transport_error",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::MessageTooLarge => "message_too_large",
            CloseReason::Evicted => "evicted",
            CloseReason::WriteFailed => "write_failed",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Outcome of a finished connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub connection_id: ConnectionId,
    pub room: QueueId,
    pub reason: CloseReason,
    pub frames_sent: u64,
    pub final_state: ConnectionState,
}

/// One WebSocket session bound to a room.
pub struct ConnectionEndpoint {
    id: ConnectionId,
    room: QueueId,
    hub: HubHandle,
    config: ConnectionConfig,
    cancel_token: CancellationToken,
    state: ConnectionState,
}

impl ConnectionEndpoint {
    #[must_use]
    pub fn new(room: QueueId, hub: HubHandle, config: ConnectionConfig) -> Self {
        let cancel_token = hub.child_token();
        Self {
            id: ConnectionId::new(),
            room,
            hub,
            config,
            cancel_token,
            state: ConnectionState::Connecting,
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        let previous = self.state;
        self.state = previous.advance(next);
        if previous != self.state {
            debug!(
                target: "qs.hub.connection",
                connection_id = %self.id,
                from = previous.as_str(),
                to = self.state.as_str(),
                "Connection state changed"
            );
        }
    }

    /// Drive the session to completion.
    ///
    /// `writer` and `reader` are the two halves of the socket. Returns after
    /// both loops have stopped and the hub registration has been released.
    #[instrument(skip_all, name = "qs.hub.connection", fields(connection_id = %self.id, queue_id = %self.room))]
    pub async fn run<W, R, E>(mut self, writer: W, reader: R) -> ConnectionSummary
    where
        W: Sink<Message> + Unpin,
        W::Error: Display,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(self.config.mailbox_capacity.max(1));
        let handle = self.hub.register(self.id, self.room, mailbox_tx).await;
        self.transition(ConnectionState::Registered);

        info!(
            target: "qs.hub.connection",
            connection_id = %self.id,
            queue_id = %handle.room,
            "Connection opened"
        );

        let token = self.cancel_token.clone();
        let (inbound, (outbound, frames_sent)) = tokio::join!(
            read_loop(
                reader,
                &token,
                self.config.read_timeout,
                self.config.max_message_bytes
            ),
            write_loop(
                writer,
                mailbox_rx,
                &token,
                self.config.ping_interval,
                self.config.write_timeout
            ),
        );

        self.transition(ConnectionState::Closing);
        self.hub.unregister(handle).await;
        self.transition(ConnectionState::Closed);

        let reason = inbound.or(outbound).unwrap_or(CloseReason::Shutdown);
        prom::record_connection_closed(reason.as_str());

        info!(
            target: "qs.hub.connection",
            connection_id = %self.id,
            queue_id = %self.room,
            reason = reason.as_str(),
            frames_sent,
            "Connection closed"
        );

        ConnectionSummary {
            connection_id: self.id,
            room: self.room,
            reason,
            frames_sent,
            final_state: self.state,
        }
    }
}

/// Read client frames until close, error, idle timeout or cancellation.
///
/// Returns `None` when stopped by the sibling loop or shutdown.
async fn read_loop<R, E>(
    mut reader: R,
    token: &CancellationToken,
    read_timeout: Duration,
    max_message_bytes: usize,
) -> Option<CloseReason>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let reason = loop {
        let next = tokio::select! {
            () = token.cancelled() => break None,
            next = timeout(read_timeout, reader.next()) => next,
        };

        match next {
            Err(_) => {
                warn!(
                    target: "qs.hub.connection",
                    timeout_secs = read_timeout.as_secs(),
                    "Connection idle, closing"
                );
                break Some(CloseReason::IdleTimeout);
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => {
                debug!(target: "qs.hub.connection", "Client closed connection");
                break Some(CloseReason::ClientClosed);
            }
            Ok(Some(Err(e))) => {
                debug!(target: "qs.hub.connection", error = %e, "Read failed");
                break Some(CloseReason::TransportError);
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                if text.len() > max_message_bytes {
                    warn!(target: "qs.hub.connection", len = text.len(), "Inbound frame too large");
                    break Some(CloseReason::MessageTooLarge);
                }
                debug!(target: "qs.hub.connection", len = text.len(), "Ignoring client text frame");
            }
            Ok(Some(Ok(Message::Binary(data)))) => {
                if data.len() > max_message_bytes {
                    warn!(target: "qs.hub.connection", len = data.len(), "Inbound frame too large");
                    break Some(CloseReason::MessageTooLarge);
                }
            }
            // Ping/pong only renew the deadline.
            Ok(Some(Ok(_))) => {}
        }
    };

    token.cancel();
    reason
}

/// Forward mailbox frames and pings until the mailbox closes, a write fails
/// or cancellation. Sends a close frame on the way out.
async fn write_loop<W>(
    mut writer: W,
    mut mailbox: mpsc::Receiver<OutboundFrame>,
    token: &CancellationToken,
    ping_interval: Duration,
    write_timeout: Duration,
) -> (Option<CloseReason>, u64)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut frames_sent = 0u64;
    let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            () = token.cancelled() => break None,

            frame = mailbox.recv() => match frame {
                Some(frame) => {
                    if let Err(reason) =
                        send_with_deadline(&mut writer, Message::Text(frame.to_string()), write_timeout).await
                    {
                        break Some(reason);
                    }
                    frames_sent += 1;
                }
                None if token.is_cancelled() => break None,
                None => {
                    debug!(target: "qs.hub.connection", "Mailbox closed by hub");
                    break Some(CloseReason::Evicted);
                }
            },

            _ = ping.tick() => {
                if let Err(reason) = send_with_deadline(&mut writer, Message::Ping(Vec::new()), write_timeout).await {
                    break Some(reason);
                }
            }
        }
    };

    if reason != Some(CloseReason::WriteFailed) {
        let _ = send_with_deadline(&mut writer, Message::Close(None), write_timeout).await;
    }
    let _ = timeout(write_timeout, writer.close()).await;

    token.cancel();
    (reason, frames_sent)
}

async fn send_with_deadline<W>(
    writer: &mut W,
    message: Message,
    write_timeout: Duration,
) -> Result<(), CloseReason>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match timeout(write_timeout, writer.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(target: "qs.hub.connection", error = %e, "Write failed");
            Err(CloseReason::WriteFailed)
        }
        Err(_) => {
            warn!(
                target: "qs.hub.connection",
                timeout_secs = write_timeout.as_secs(),
                "Write deadline exceeded"
            );
            Err(CloseReason::WriteFailed)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::hub::messages::BroadcastMessage;
    use common::types::UserId;
    use futures::channel::mpsc as fmpsc;
    use tokio::task::JoinHandle;

    type ReaderTx = fmpsc::UnboundedSender<Result<Message, axum::Error>>;
    type WriterRx = fmpsc::UnboundedReceiver<Message>;

    fn spawn_endpoint(
        hub: &HubHandle,
        room: QueueId,
    ) -> (ReaderTx, WriterRx, JoinHandle<ConnectionSummary>) {
        let (writer_tx, writer_rx) = fmpsc::unbounded::<Message>();
        let (reader_tx, reader_rx) = fmpsc::unbounded::<Result<Message, axum::Error>>();
        let endpoint = ConnectionEndpoint::new(room, hub.clone(), ConnectionConfig::default());
        let task = tokio::spawn(endpoint.run(writer_tx, reader_rx));
        (reader_tx, writer_rx, task)
    }

    async fn wait_for_room(hub: &HubHandle, room: QueueId, size: usize) {
        while hub.room_size(room).await.unwrap() != size {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_state_machine_forward_path() {
        let state = ConnectionState::Connecting
            .advance(ConnectionState::Registered)
            .advance(ConnectionState::Closing)
            .advance(ConnectionState::Closed);
        assert_eq!(state, ConnectionState::Closed);
    }

    #[test]
    fn test_closed_is_absorbing() {
        let closed = ConnectionState::Closed;
        assert_eq!(closed.advance(ConnectionState::Registered), closed);
        assert_eq!(closed.advance(ConnectionState::Connecting), closed);
        assert_eq!(closed.advance(ConnectionState::Closing), closed);
    }

    #[test]
    fn test_terminal_transition_from_any_state() {
        assert_eq!(
            ConnectionState::Connecting.advance(ConnectionState::Closed),
            ConnectionState::Closed
        );
        assert_eq!(
            ConnectionState::Registered.advance(ConnectionState::Closing),
            ConnectionState::Closing
        );
    }

    #[test]
    fn test_no_backward_transitions() {
        assert_eq!(
            ConnectionState::Closing.advance(ConnectionState::Registered),
            ConnectionState::Closing
        );
        assert_eq!(
            ConnectionState::Registered.advance(ConnectionState::Connecting),
            ConnectionState::Registered
        );
    }

    #[tokio::test]
    async fn test_client_close_unregisters_once() {
        let hub = HubHandle::new(CancellationToken::new());
        let (reader_tx, writer_rx, task) = spawn_endpoint(&hub, QueueId(1));
        wait_for_room(&hub, QueueId(1), 1).await;

        reader_tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        let summary = task.await.unwrap();

        assert_eq!(summary.reason, CloseReason::ClientClosed);
        assert_eq!(summary.final_state, ConnectionState::Closed);
        assert_eq!(hub.room_size(QueueId(1)).await.unwrap(), 0);
        assert_eq!(hub.metrics().active_connections(), 0);

        let sent: Vec<Message> = writer_rx.collect().await;
        assert!(matches!(sent.last(), Some(Message::Close(None))));

        hub.cancel();
    }

    #[tokio::test]
    async fn test_broadcast_is_forwarded_as_text() {
        let hub = HubHandle::new(CancellationToken::new());
        let (reader_tx, mut writer_rx, task) = spawn_endpoint(&hub, QueueId(5));
        wait_for_room(&hub, QueueId(5), 1).await;

        hub.publish(BroadcastMessage::user_joined(QueueId(5), UserId(9), 1))
            .await;

        let Some(Message::Text(text)) = writer_rx.next().await else {
            unreachable!("expected a text frame");
        };
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["event_type"], "user_joined");
        assert_eq!(json["queue_id"], "5");
        assert_eq!(json["data"]["user_id"], 9);

        drop(reader_tx);
        let summary = task.await.unwrap();
        assert_eq!(summary.reason, CloseReason::ClientClosed);
        assert_eq!(summary.frames_sent, 1);

        hub.cancel();
    }

    #[tokio::test]
    async fn test_read_error_closes_connection() {
        let hub = HubHandle::new(CancellationToken::new());
        let (reader_tx, _writer_rx, task) = spawn_endpoint(&hub, QueueId(2));

        reader_tx
            .unbounded_send(Err(axum::Error::new(std::io::Error::other("reset"))))
            .unwrap();

        let summary = task.await.unwrap();
        assert_eq!(summary.reason, CloseReason::TransportError);
        assert_eq!(hub.room_size(QueueId(2)).await.unwrap(), 0);

        hub.cancel();
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let hub = HubHandle::new(CancellationToken::new());
        let (reader_tx, _writer_rx, task) = spawn_endpoint(&hub, QueueId(2));

        reader_tx
            .unbounded_send(Ok(Message::Text("x".repeat(513))))
            .unwrap();

        let summary = task.await.unwrap();
        assert_eq!(summary.reason, CloseReason::MessageTooLarge);

        hub.cancel();
    }

    #[tokio::test]
    async fn test_small_text_frames_are_ignored() {
        let hub = HubHandle::new(CancellationToken::new());
        let (reader_tx, _writer_rx, task) = spawn_endpoint(&hub, QueueId(2));
        wait_for_room(&hub, QueueId(2), 1).await;

        reader_tx
            .unbounded_send(Ok(Message::Text("hello".to_string())))
            .unwrap();
        assert_eq!(hub.room_size(QueueId(2)).await.unwrap(), 1);

        drop(reader_tx);
        assert_eq!(task.await.unwrap().reason, CloseReason::ClientClosed);

        hub.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_is_pinged_then_closed() {
        let hub = HubHandle::new(CancellationToken::new());
        let (_reader_tx, writer_rx, task) = spawn_endpoint(&hub, QueueId(3));

        let summary = task.await.unwrap();
        assert_eq!(summary.reason, CloseReason::IdleTimeout);

        let sent: Vec<Message> = writer_rx.collect().await;
        assert!(matches!(sent.first(), Some(Message::Ping(_))));
        assert!(matches!(sent.last(), Some(Message::Close(None))));

        hub.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_renews_read_deadline() {
        let hub = HubHandle::new(CancellationToken::new());
        let (reader_tx, _writer_rx, task) = spawn_endpoint(&hub, QueueId(4));

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(40)).await;
            reader_tx
                .unbounded_send(Ok(Message::Pong(Vec::new())))
                .unwrap();
        }
        // 120s elapsed, well past a single 60s deadline.
        assert!(!task.is_finished());

        let summary = task.await.unwrap();
        assert_eq!(summary.reason, CloseReason::IdleTimeout);

        hub.cancel();
    }

    #[tokio::test]
    async fn test_hub_shutdown_closes_connection() {
        let hub = HubHandle::new(CancellationToken::new());
        let (_reader_tx, writer_rx, task) = spawn_endpoint(&hub, QueueId(6));
        wait_for_room(&hub, QueueId(6), 1).await;

        hub.cancel();
        let summary = task.await.unwrap();

        assert_eq!(summary.reason, CloseReason::Shutdown);
        assert_eq!(summary.final_state, ConnectionState::Closed);
        let sent: Vec<Message> = writer_rx.collect().await;
        assert!(matches!(sent.last(), Some(Message::Close(None))));
    }
}
