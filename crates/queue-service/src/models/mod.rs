//! Queue service models.
//!
//! Domain records shared by the ledger, the scheduler and the handlers,
//! plus the JSON request/response bodies of the HTTP surface.

use chrono::{DateTime, Utc};
use common::types::{QueueId, ScheduleId, UserId};
use serde::{Deserialize, Serialize};

/// A time-boxed waiting queue gating one scheduled event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub id: QueueId,
    pub schedule_id: ScheduleId,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub is_active: bool,
    /// Optional participant limit. `None` means unlimited.
    pub max_participants: Option<i32>,
}

impl Queue {
    /// Whether a join at `now` is allowed by the lifecycle window.
    ///
    /// Both window bounds are inclusive.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.opens_at <= now && now <= self.closes_at
    }
}

/// Parameters for creating a queue.
#[derive(Debug, Clone)]
pub struct NewQueue {
    pub schedule_id: ScheduleId,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub is_active: bool,
    pub max_participants: Option<i32>,
}

/// One membership record. Active while `exited_at` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub user_id: UserId,
    pub queue_id: QueueId,
    /// 1-based position among the active entries of the queue.
    pub position: i32,
    pub exited_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn is_active(&self) -> bool {
        self.exited_at.is_none()
    }
}

/// Scheduled event that a queue gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    /// Identifier in the upstream timetable.
    pub external_id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Comma-separated upstream group ids, e.g. `"67,203,111"`.
    pub group_ids: String,
}

/// Parameters for inserting a schedule (ingestion and test fixtures).
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub external_id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub group_ids: String,
}

impl Schedule {
    /// Upstream group ids as a list, skipping empty segments.
    pub fn group_id_list(&self) -> Vec<String> {
        split_group_ids(&self.group_ids)
    }
}

pub(crate) fn split_group_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Display attributes of a user, owned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub surname: String,
}

/// Active participant as shown in status responses and snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub name: String,
    pub surname: String,
    pub position: i32,
}

/// Queue metadata plus its ordered active participants.
///
/// Serves both `GET /status` and the periodic `queue_update` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub queue_id: QueueId,
    pub schedule_id: ScheduleId,
    pub is_active: bool,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub participants: Vec<Participant>,
}

impl QueueSnapshot {
    pub fn new(queue: &Queue, participants: Vec<Participant>) -> Self {
        Self {
            queue_id: queue.id,
            schedule_id: queue.schedule_id,
            is_active: queue.is_active,
            opens_at: queue.opens_at,
            closes_at: queue.closes_at,
            participants,
        }
    }
}

/// An active membership of the calling user, joined with its queue and event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserQueueItem {
    pub queue_id: QueueId,
    pub position: i32,
    pub schedule_id: ScheduleId,
    pub schedule_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub group_ids: Vec<String>,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Response body of `POST /api/v1/queues/:id/join`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinQueueResponse {
    pub message: String,
    pub position: i32,
}

/// Response body of `POST /api/v1/queues/:id/leave`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveQueueResponse {
    pub message: String,
    pub left_position: i32,
}

/// Readiness response.
///
/// Returned by the `/ready` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Overall status ("ready" or "not_ready").
    pub status: String,

    /// Store connectivity ("healthy" or "unhealthy").
    pub database: String,

    /// Hub sequencer status ("healthy" or "unhealthy").
    pub hub: String,

    /// Live WebSocket connections registered in the hub.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections: Option<usize>,
}
