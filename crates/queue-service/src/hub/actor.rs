//! `HubActor` - single sequencer owning the room registry.
//!
//! Every register, unregister and publish request arrives through one ordered
//! mailbox, so the room map needs no lock and the order in which producers
//! hand messages to the hub is the order in which each room observes them.
//!
//! Delivery to a connection is a non-blocking `try_send` into its bounded
//! outbound mailbox. A full or closed mailbox evicts the connection: the
//! sender is dropped, which the connection's outbound loop observes as a
//! closed channel and turns into a WebSocket close.

use super::messages::{
    BroadcastMessage, HubMessage, HubStatus, Mailbox, OutboundFrame, SubscriptionHandle,
};
use super::metrics::{HubMetrics, MailboxMonitor};
use crate::errors::QueueError;

use common::types::{ConnectionId, QueueId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for the hub sequencer mailbox.
const HUB_CHANNEL_BUFFER: usize = 1000;

/// Handle to the `HubActor`.
///
/// Cheap to clone; every clone talks to the same sequencer. Producers and
/// connection endpoints receive one by injection.
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<HubMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl HubHandle {
    /// Spawn the hub sequencer and return a handle to it.
    ///
    /// The actor stops when `cancel_token` is cancelled, dropping every
    /// registered mailbox so that all connections close.
    #[must_use]
    pub fn new(cancel_token: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::channel(HUB_CHANNEL_BUFFER);
        let metrics = Arc::new(HubMetrics::new());
        let mailbox = Arc::new(MailboxMonitor::new());

        let actor = HubActor {
            receiver,
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            memberships: HashMap::new(),
            metrics: Arc::clone(&metrics),
            mailbox: Arc::clone(&mailbox),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            metrics,
            mailbox,
        }
    }

    async fn send(&self, message: HubMessage) -> Result<(), QueueError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| QueueError::Internal(format!("hub channel send failed: {e}")))?;
        self.mailbox.record_enqueue();
        Ok(())
    }

    /// Attach `mailbox` to `room` under `connection_id`.
    ///
    /// Never fails. If the connection is already registered the call is a
    /// no-op and the existing subscription is returned. If the hub has
    /// stopped, the mailbox sender is dropped here, so the caller sees its
    /// outbound channel close immediately.
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        room: QueueId,
        mailbox: Mailbox,
    ) -> SubscriptionHandle {
        let fallback = SubscriptionHandle {
            connection_id,
            room,
        };
        let (tx, rx) = oneshot::channel();

        let sent = self
            .send(HubMessage::Register {
                connection_id,
                room,
                mailbox,
                respond_to: tx,
            })
            .await;

        if let Err(e) = sent {
            warn!(target: "qs.hub", error = %e, "Register on stopped hub");
            return fallback;
        }

        match rx.await {
            Ok(handle) => handle,
            Err(_) => {
                warn!(target: "qs.hub", connection_id = %connection_id, "Hub dropped register response");
                fallback
            }
        }
    }

    /// Detach a connection. Idempotent; unknown handles are ignored.
    pub async fn unregister(&self, handle: SubscriptionHandle) {
        if let Err(e) = self.send(HubMessage::Unregister { handle }).await {
            debug!(target: "qs.hub", error = %e, "Unregister on stopped hub");
        }
    }

    /// Queue `message` for delivery to its room.
    ///
    /// Returns once the sequencer has accepted the message; delivery itself
    /// is asynchronous. A stopped hub drops the message with a warning.
    pub async fn publish(&self, message: BroadcastMessage) {
        let event_type = message.event_type.as_str();
        let room = message.queue_id;
        if let Err(e) = self.send(HubMessage::Publish { message }).await {
            warn!(
                target: "qs.hub",
                queue_id = %room,
                event_type,
                error = %e,
                "Dropping broadcast, hub is not running"
            );
        }
    }

    /// Number of connections registered to `room`.
    pub async fn room_size(&self, room: QueueId) -> Result<usize, QueueError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubMessage::RoomSize {
            room,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| QueueError::Internal(format!("hub response receive failed: {e}")))
    }

    /// Current hub status. Fails if the sequencer is not running.
    pub async fn status(&self) -> Result<HubStatus, QueueError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubMessage::GetStatus { respond_to: tx }).await?;

        rx.await
            .map_err(|e| QueueError::Internal(format!("hub response receive failed: {e}")))
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<HubMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Stop the sequencer.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Child token for connection endpoints, cancelled with the hub.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// The sequencer. Owns the room map and the connection index.
struct HubActor {
    receiver: mpsc::Receiver<HubMessage>,
    cancel_token: CancellationToken,
    rooms: HashMap<QueueId, HashMap<ConnectionId, Mailbox>>,
    /// Reverse index used for idempotent register.
    memberships: HashMap<ConnectionId, QueueId>,
    metrics: Arc<HubMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl HubActor {
    #[instrument(skip_all, name = "qs.hub")]
    async fn run(mut self) {
        info!(target: "qs.hub", "Hub started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "qs.hub", "Hub received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(target: "qs.hub", "Hub channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        let remaining = self.memberships.len();
        for _ in 0..remaining {
            self.metrics.connection_removed();
        }
        self.rooms.clear();
        self.memberships.clear();

        info!(
            target: "qs.hub",
            connections_closed = remaining,
            messages_processed = self.mailbox.messages_processed(),
            "Hub stopped"
        );
    }

    fn handle_message(&mut self, message: HubMessage) {
        match message {
            HubMessage::Register {
                connection_id,
                room,
                mailbox,
                respond_to,
            } => {
                let handle = self.register(connection_id, room, mailbox);
                let _ = respond_to.send(handle);
            }

            HubMessage::Unregister { handle } => {
                self.unregister(&handle);
            }

            HubMessage::Publish { message } => {
                self.publish(&message);
            }

            HubMessage::RoomSize { room, respond_to } => {
                let size = self.rooms.get(&room).map_or(0, HashMap::len);
                let _ = respond_to.send(size);
            }

            HubMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(HubStatus {
                    rooms: self.rooms.len(),
                    connections: self.memberships.len(),
                });
            }
        }
    }

    fn register(
        &mut self,
        connection_id: ConnectionId,
        room: QueueId,
        mailbox: Mailbox,
    ) -> SubscriptionHandle {
        if let Some(existing) = self.memberships.get(&connection_id) {
            debug!(
                target: "qs.hub",
                connection_id = %connection_id,
                queue_id = %existing,
                "Connection already registered"
            );
            return SubscriptionHandle {
                connection_id,
                room: *existing,
            };
        }

        self.rooms
            .entry(room)
            .or_default()
            .insert(connection_id, mailbox);
        self.memberships.insert(connection_id, room);
        self.metrics.connection_registered();

        debug!(
            target: "qs.hub",
            connection_id = %connection_id,
            queue_id = %room,
            room_size = self.rooms.get(&room).map_or(0, HashMap::len),
            "Connection registered"
        );

        SubscriptionHandle {
            connection_id,
            room,
        }
    }

    fn unregister(&mut self, handle: &SubscriptionHandle) {
        if self.memberships.get(&handle.connection_id) != Some(&handle.room) {
            return;
        }
        self.remove(handle.room, handle.connection_id);

        debug!(
            target: "qs.hub",
            connection_id = %handle.connection_id,
            queue_id = %handle.room,
            "Connection unregistered"
        );
    }

    /// Remove a connection, dropping its mailbox sender.
    fn remove(&mut self, room: QueueId, connection_id: ConnectionId) {
        self.memberships.remove(&connection_id);
        if let Some(members) = self.rooms.get_mut(&room) {
            if members.remove(&connection_id).is_some() {
                self.metrics.connection_removed();
            }
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }
    }

    fn publish(&mut self, message: &BroadcastMessage) {
        let room = message.queue_id;
        let event_type = message.event_type.as_str();

        let Some(members) = self.rooms.get_mut(&room) else {
            debug!(target: "qs.hub", queue_id = %room, event_type, "Publish to empty room");
            return;
        };

        let frame: OutboundFrame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(target: "qs.hub", queue_id = %room, error = %e, "Failed to serialize broadcast");
                return;
            }
        };

        let mut delivered = 0usize;
        let mut evicted: Vec<(ConnectionId, &'static str)> = Vec::new();

        members.retain(|connection_id, mailbox| {
            match mailbox.try_send(Arc::clone(&frame)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    evicted.push((*connection_id, "mailbox_full"));
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    evicted.push((*connection_id, "mailbox_closed"));
                    false
                }
            }
        });

        if members.is_empty() {
            self.rooms.remove(&room);
        }

        for (connection_id, reason) in evicted {
            self.memberships.remove(&connection_id);
            self.metrics.connection_removed();
            self.metrics.connection_evicted(reason);
            warn!(
                target: "qs.hub",
                connection_id = %connection_id,
                queue_id = %room,
                reason,
                "Evicted connection"
            );
        }

        self.metrics.message_published(event_type, delivered);
        debug!(target: "qs.hub", queue_id = %room, event_type, delivered, "Broadcast delivered");
    }
}
