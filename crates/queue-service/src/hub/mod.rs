//! Broadcast hub.
//!
//! Fans room-scoped notifications out to live WebSocket connections. A room
//! is keyed by queue id. The room registry lives inside a single sequencer
//! task ([`HubHandle`]); connection endpoints register a bounded outbound
//! mailbox and are evicted if it fills up.

pub mod actor;
pub mod connection;
pub mod messages;
pub mod metrics;

pub use actor::HubHandle;
pub use connection::{CloseReason, ConnectionEndpoint, ConnectionState, ConnectionSummary};
pub use messages::{BroadcastMessage, EventType, HubStatus, SubscriptionHandle};
pub use metrics::HubMetrics;
