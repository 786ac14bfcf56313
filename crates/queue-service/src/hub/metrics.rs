//! Hub counters and sequencer mailbox monitoring.
//!
//! Counters are kept in atomics so tests and the readiness endpoint can read
//! them without a round trip through the sequencer. Every update is mirrored
//! to the Prometheus recorder via [`crate::observability::metrics`].

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Sequencer mailbox depth above which enqueue is logged at debug.
pub const HUB_MAILBOX_NORMAL: usize = 100;

/// Sequencer mailbox depth above which enqueue is logged at warn.
pub const HUB_MAILBOX_WARNING: usize = 500;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

impl MailboxLevel {
    #[must_use]
    pub fn for_depth(depth: usize) -> Self {
        if depth < HUB_MAILBOX_NORMAL {
            MailboxLevel::Normal
        } else if depth <= HUB_MAILBOX_WARNING {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Critical
        }
    }
}

/// Tracks queue depth of the hub sequencer's own mailbox.
#[derive(Debug, Default)]
pub struct MailboxMonitor {
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);

        match MailboxLevel::for_depth(new_depth) {
            MailboxLevel::Critical => warn!(
                target: "qs.hub.mailbox",
                depth = new_depth,
                threshold = HUB_MAILBOX_WARNING,
                "Hub mailbox depth critical"
            ),
            MailboxLevel::Warning if new_depth == HUB_MAILBOX_NORMAL => debug!(
                target: "qs.hub.mailbox",
                depth = new_depth,
                "Hub mailbox depth elevated"
            ),
            _ => {}
        }
    }

    pub fn record_dequeue(&self) {
        // Saturating: a message may be dequeued that was sent before the
        // monitor observed its enqueue.
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            });
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }
}

/// Aggregate hub counters shared between the handle and the sequencer.
#[derive(Debug, Default)]
pub struct HubMetrics {
    active_connections: AtomicUsize,
    messages_published: AtomicU64,
    frames_delivered: AtomicU64,
    evictions: AtomicU64,
}

impl HubMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_registered(&self) {
        let count = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_ws_connections(count);
    }

    pub fn connection_removed(&self) {
        let count = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_sub(1))
            })
            .map_or(0, |prev| prev.saturating_sub(1));
        prom::set_ws_connections(count);
    }

    pub fn message_published(&self, event_type: &'static str, delivered: usize) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
        self.frames_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        prom::record_broadcast(event_type, delivered);
    }

    pub fn connection_evicted(&self, reason: &'static str) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        prom::record_eviction(reason);
    }

    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}
