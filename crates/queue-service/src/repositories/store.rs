//! Storage trait consumed by the ledger, the scheduler and the handlers.
//!
//! Multi-step mutations (position assignment with its open-window check,
//! leave + compaction, the close flip) are single methods so each implementation can run
//! them as one atomic unit.

use crate::errors::QueueError;
use crate::models::{NewQueue, Queue, QueueEntry, QueueSnapshot, Schedule, UserQueueItem};
use chrono::{DateTime, Utc};
use common::types::{QueueId, UserId};

#[async_trait::async_trait]
pub trait QueueStore: Send + Sync {
    async fn get_queue(&self, queue_id: QueueId) -> Result<Option<Queue>, QueueError>;

    /// The user's entry in the queue with `exited_at IS NULL`, if any.
    async fn find_active_entry(
        &self,
        queue_id: QueueId,
        user_id: UserId,
    ) -> Result<Option<QueueEntry>, QueueError>;

    async fn count_active_entries(&self, queue_id: QueueId) -> Result<i64, QueueError>;

    /// Insert an active entry at `max(active position) + 1`.
    ///
    /// The queue must still be open at `now` when the entry is written:
    /// `Inactive` otherwise, checked in the same atomic unit as the insert.
    /// Returns `AlreadyMember` if the user already holds an active entry.
    async fn append_entry(
        &self,
        queue_id: QueueId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, QueueError>;

    /// Stamp the user's active entry with `exited_at` and shift every later
    /// active entry down by one, atomically.
    ///
    /// Returns the vacated position, or `None` if there was no active entry.
    async fn exit_entry(
        &self,
        queue_id: QueueId,
        user_id: UserId,
        exited_at: DateTime<Utc>,
    ) -> Result<Option<i32>, QueueError>;

    /// Queue metadata and participants read from one consistent snapshot.
    async fn queue_snapshot(&self, queue_id: QueueId) -> Result<Option<QueueSnapshot>, QueueError>;

    async fn list_active_queues(&self) -> Result<Vec<Queue>, QueueError>;

    /// Active queues with `closes_at <= now`, ordered by id.
    async fn expired_active_queues(&self, now: DateTime<Utc>) -> Result<Vec<Queue>, QueueError>;

    /// Flip one queue to inactive if it is active with `closes_at <= now`.
    ///
    /// A single conditional update: of any number of concurrent callers at
    /// most one gets the changed queue back.
    async fn close_queue_if_expired(
        &self,
        queue_id: QueueId,
        now: DateTime<Utc>,
    ) -> Result<Option<Queue>, QueueError>;

    /// Schedules with `from <= start_time <= to` that have no queue yet.
    async fn upcoming_schedules_without_queue(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Schedule>, QueueError>;

    /// Create a queue unless one already exists for the schedule.
    async fn create_queue(&self, new_queue: NewQueue) -> Result<Option<Queue>, QueueError>;

    /// Delete schedules with `end_time < cutoff`. Their queues and entries go with them.
    async fn purge_schedules_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueError>;

    /// Delete inactive queues with `closes_at < cutoff`, with their entries.
    async fn purge_queues_closed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueError>;

    /// Active memberships of a user, joined with queue and schedule data.
    async fn active_entries_for_user(&self, user_id: UserId) -> Result<Vec<UserQueueItem>, QueueError>;

    /// Connectivity check for readiness.
    async fn ping(&self) -> Result<(), QueueError>;
}
