//! Message types for the broadcast hub.
//!
//! `HubMessage` is the hub sequencer's mailbox type; callers never touch the
//! room map directly. `BroadcastMessage` is the value object producers hand to
//! the hub, serialized once per publish into an [`OutboundFrame`].

use crate::models::QueueSnapshot;
use common::error::ServiceError;
use common::types::{ConnectionId, QueueId, UserId};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Serialized text frame shared by every connection in a room.
pub type OutboundFrame = Arc<str>;

/// Sender half of a connection's bounded outbound mailbox.
pub type Mailbox = mpsc::Sender<OutboundFrame>;

/// Event types carried in the `event_type` field of outbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UserJoined,
    UserLeft,
    QueueClosed,
    QueueUpdate,
}

impl EventType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventType::UserJoined => "user_joined",
            EventType::UserLeft => "user_left",
            EventType::QueueClosed => "queue_closed",
            EventType::QueueUpdate => "queue_update",
        }
    }
}

/// Room-scoped notification produced by the ledger or the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastMessage {
    pub event_type: EventType,
    pub queue_id: QueueId,
    pub data: Value,
}

/// Wire shape: `{ "event_type": string, "queue_id": string, "data": object|null }`.
#[derive(Serialize)]
struct WireFrame<'a> {
    event_type: EventType,
    queue_id: String,
    data: &'a Value,
}

impl BroadcastMessage {
    pub fn user_joined(queue_id: QueueId, user_id: UserId, position: i32) -> Self {
        Self {
            event_type: EventType::UserJoined,
            queue_id,
            data: json!({ "user_id": user_id, "position": position }),
        }
    }

    pub fn user_left(queue_id: QueueId, user_id: UserId, left_position: i32) -> Self {
        Self {
            event_type: EventType::UserLeft,
            queue_id,
            data: json!({ "user_id": user_id, "left_position": left_position }),
        }
    }

    pub fn queue_closed(queue_id: QueueId) -> Self {
        Self {
            event_type: EventType::QueueClosed,
            queue_id,
            data: json!({}),
        }
    }

    pub fn queue_update(snapshot: &QueueSnapshot) -> Result<Self, ServiceError> {
        Ok(Self {
            event_type: EventType::QueueUpdate,
            queue_id: snapshot.queue_id,
            data: serde_json::to_value(snapshot)?,
        })
    }

    /// Serialize into the JSON text frame sent to clients.
    pub fn to_frame(&self) -> Result<OutboundFrame, ServiceError> {
        let frame = WireFrame {
            event_type: self.event_type,
            queue_id: self.queue_id.to_string(),
            data: &self.data,
        };
        Ok(Arc::from(serde_json::to_string(&frame)?))
    }
}

/// Proof of registration returned by `Register`, consumed by `Unregister`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub connection_id: ConnectionId,
    pub room: QueueId,
}

/// Point-in-time hub status for readiness checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStatus {
    pub rooms: usize,
    pub connections: usize,
}

/// Messages sent to the hub sequencer.
#[derive(Debug)]
pub enum HubMessage {
    /// Attach a connection's mailbox to a room.
    Register {
        connection_id: ConnectionId,
        room: QueueId,
        mailbox: Mailbox,
        /// Response channel carrying the (possibly pre-existing) subscription.
        respond_to: oneshot::Sender<SubscriptionHandle>,
    },

    /// Detach a connection and drop its mailbox sender.
    Unregister { handle: SubscriptionHandle },

    /// Deliver a message to every connection in a room.
    Publish { message: BroadcastMessage },

    /// Number of connections currently registered to a room.
    RoomSize {
        room: QueueId,
        respond_to: oneshot::Sender<usize>,
    },

    /// Current room and connection counts.
    GetStatus { respond_to: oneshot::Sender<HubStatus> },
}
