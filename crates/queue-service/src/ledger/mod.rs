//! Position ledger.
//!
//! Owns the membership rules of a queue: join appends at the tail, leave
//! stamps the entry and shifts everyone behind it forward, so active
//! positions are always exactly `1..N`.
//!
//! Join and leave on the same queue are serialized by a per-queue async
//! mutex; different queues proceed in parallel. The hub publish happens
//! while the mutex is still held, which makes the order of events in a room
//! the order in which the mutations were committed.

use crate::errors::QueueError;
use crate::hub::{BroadcastMessage, HubHandle};
use crate::models::{Queue, QueueSnapshot, UserQueueItem};
use crate::observability::metrics::record_ledger_operation;
use crate::repositories::QueueStore;

use chrono::{DateTime, Utc};
use common::types::{QueueId, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Lock table size above which idle per-queue locks are pruned.
const LOCK_TABLE_PRUNE_THRESHOLD: usize = 1024;

pub struct PositionLedger {
    store: Arc<dyn QueueStore>,
    hub: HubHandle,
    locks: Mutex<HashMap<QueueId, Arc<tokio::sync::Mutex<()>>>>,
}

impl PositionLedger {
    pub fn new(store: Arc<dyn QueueStore>, hub: HubHandle) -> Self {
        Self {
            store,
            hub,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// The async mutex guarding mutations of one queue.
    fn queue_lock(&self, queue_id: QueueId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.len() >= LOCK_TABLE_PRUNE_THRESHOLD {
            // Only the table holds an unused lock.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(locks.entry(queue_id).or_default())
    }

    /// Add `user_id` to the tail of the queue and return the new position.
    pub async fn join(&self, queue_id: QueueId, user_id: UserId) -> Result<i32, QueueError> {
        self.join_with_clock(queue_id, user_id, Utc::now).await
    }

    /// [`join`](Self::join) evaluated against an explicit clock reading.
    pub async fn join_at(
        &self,
        queue_id: QueueId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<i32, QueueError> {
        self.join_with_clock(queue_id, user_id, move || now).await
    }

    /// The clock is read only once the queue's mutex is held.
    #[instrument(skip_all, name = "qs.ledger.join", fields(queue_id = %queue_id, user_id = %user_id))]
    async fn join_with_clock<C>(
        &self,
        queue_id: QueueId,
        user_id: UserId,
        clock: C,
    ) -> Result<i32, QueueError>
    where
        C: FnOnce() -> DateTime<Utc>,
    {
        let start = Instant::now();
        let lock = self.queue_lock(queue_id);
        let _guard = lock.lock().await;

        let result = self.join_locked(queue_id, user_id, clock()).await;
        record_ledger_operation("join", outcome(&result), start.elapsed());
        result
    }

    async fn join_locked(
        &self,
        queue_id: QueueId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<i32, QueueError> {
        let queue = self
            .store
            .get_queue(queue_id)
            .await?
            .ok_or(QueueError::NotFound)?;

        if !queue.is_open_at(now) {
            debug!(target: "qs.ledger", queue_id = %queue_id, "Join rejected, queue not open");
            return Err(QueueError::Inactive);
        }

        if self
            .store
            .find_active_entry(queue_id, user_id)
            .await?
            .is_some()
        {
            return Err(QueueError::AlreadyMember);
        }

        if let Some(max) = queue.max_participants {
            let active = self.store.count_active_entries(queue_id).await?;
            if active >= i64::from(max) {
                return Err(QueueError::QueueFull);
            }
        }

        // The store re-checks the window atomically with the insert; another
        // process may have closed the queue since the read above.
        let entry = self.store.append_entry(queue_id, user_id, now).await?;

        self.hub
            .publish(BroadcastMessage::user_joined(queue_id, user_id, entry.position))
            .await;

        info!(
            target: "qs.ledger",
            queue_id = %queue_id,
            user_id = %user_id,
            position = entry.position,
            "User joined queue"
        );

        Ok(entry.position)
    }

    /// Remove `user_id` from the queue and return the position they vacated.
    ///
    /// Allowed after the queue has closed. An unknown queue has no member, so
    /// it is reported as `NotMember` like any other missing entry.
    pub async fn leave(&self, queue_id: QueueId, user_id: UserId) -> Result<i32, QueueError> {
        self.leave_with_clock(queue_id, user_id, Utc::now).await
    }

    pub async fn leave_at(
        &self,
        queue_id: QueueId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<i32, QueueError> {
        self.leave_with_clock(queue_id, user_id, move || now).await
    }

    #[instrument(skip_all, name = "qs.ledger.leave", fields(queue_id = %queue_id, user_id = %user_id))]
    async fn leave_with_clock<C>(
        &self,
        queue_id: QueueId,
        user_id: UserId,
        clock: C,
    ) -> Result<i32, QueueError>
    where
        C: FnOnce() -> DateTime<Utc>,
    {
        let start = Instant::now();
        let lock = self.queue_lock(queue_id);
        let _guard = lock.lock().await;

        let result = self.leave_locked(queue_id, user_id, clock()).await;
        record_ledger_operation("leave", outcome(&result), start.elapsed());
        result
    }

    async fn leave_locked(
        &self,
        queue_id: QueueId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<i32, QueueError> {
        let left_position = self
            .store
            .exit_entry(queue_id, user_id, now)
            .await?
            .ok_or(QueueError::NotMember)?;

        self.hub
            .publish(BroadcastMessage::user_left(queue_id, user_id, left_position))
            .await;

        info!(
            target: "qs.ledger",
            queue_id = %queue_id,
            user_id = %user_id,
            left_position,
            "User left queue"
        );

        Ok(left_position)
    }

    /// Close the queue if its window ended by `now` and announce it.
    ///
    /// Runs under the queue's mutex, so `queue_closed` is ordered after any
    /// join or leave already in progress and no join is admitted after it.
    /// Returns the closed queue, or `None` if this call did not close it.
    #[instrument(skip_all, name = "qs.ledger.close", fields(queue_id = %queue_id))]
    pub async fn close_if_expired(
        &self,
        queue_id: QueueId,
        now: DateTime<Utc>,
    ) -> Result<Option<Queue>, QueueError> {
        let lock = self.queue_lock(queue_id);
        let _guard = lock.lock().await;

        let closed = self.store.close_queue_if_expired(queue_id, now).await?;
        if closed.is_some() {
            self.hub.publish(BroadcastMessage::queue_closed(queue_id)).await;
        }
        Ok(closed)
    }

    /// Queue metadata with its ordered active participants. Read-only.
    #[instrument(skip_all, name = "qs.ledger.status", fields(queue_id = %queue_id))]
    pub async fn status(&self, queue_id: QueueId) -> Result<QueueSnapshot, QueueError> {
        let start = Instant::now();
        let result = self
            .store
            .queue_snapshot(queue_id)
            .await
            .and_then(|snapshot| snapshot.ok_or(QueueError::NotFound));
        record_ledger_operation("status", outcome(&result), start.elapsed());
        result
    }

    /// Broadcast the current snapshot of a queue as `queue_update`.
    ///
    /// Taken under the queue's mutex so the snapshot cannot overtake an
    /// in-flight join or leave event in the room.
    pub async fn publish_snapshot(&self, queue_id: QueueId) -> Result<(), QueueError> {
        let lock = self.queue_lock(queue_id);
        let _guard = lock.lock().await;

        let snapshot = self.status(queue_id).await?;
        let message = BroadcastMessage::queue_update(&snapshot)
            .map_err(|e| QueueError::Internal(format!("snapshot serialization failed: {e}")))?;
        self.hub.publish(message).await;
        Ok(())
    }

    /// Active memberships of a user across all queues.
    pub async fn user_queues(&self, user_id: UserId) -> Result<Vec<UserQueueItem>, QueueError> {
        self.store.active_entries_for_user(user_id).await
    }
}

fn outcome<T>(result: &Result<T, QueueError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::hub::messages::OutboundFrame;
    use crate::models::{NewQueue, NewSchedule, QueueEntry, Schedule, UserProfile};
    use crate::repositories::InMemoryQueueStore;
    use chrono::Duration;
    use common::types::{ConnectionId, ScheduleId};
    use std::time::Duration as StdDuration;
    use tokio::sync::{mpsc, Notify};
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        store: Arc<InMemoryQueueStore>,
        hub: HubHandle,
        ledger: Arc<PositionLedger>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryQueueStore::new());
            let hub = HubHandle::new(CancellationToken::new());
            let ledger = Arc::new(PositionLedger::new(store.clone(), hub.clone()));
            Self { store, hub, ledger }
        }

        async fn queue(&self, opens_in_min: i64, closes_in_min: i64, max: Option<i32>) -> Queue {
            let now = Utc::now();
            let schedule = self
                .store
                .insert_schedule(NewSchedule {
                    external_id: format!("ext-{}", ConnectionId::new()),
                    name: "Operating Systems".to_string(),
                    start_time: now + Duration::minutes(closes_in_min),
                    end_time: now + Duration::minutes(closes_in_min + 90),
                    group_ids: "67".to_string(),
                })
                .await;
            self.store
                .insert_queue(NewQueue {
                    schedule_id: schedule.id,
                    opens_at: now + Duration::minutes(opens_in_min),
                    closes_at: now + Duration::minutes(closes_in_min),
                    is_active: true,
                    max_participants: max,
                })
                .await
        }

        async fn open_queue(&self) -> Queue {
            self.queue(-5, 60, None).await
        }

        async fn subscribe(&self, queue_id: QueueId) -> mpsc::Receiver<OutboundFrame> {
            let (tx, rx) = mpsc::channel(64);
            self.hub.register(ConnectionId::new(), queue_id, tx).await;
            rx
        }

        async fn positions(&self, queue_id: QueueId) -> Vec<(i64, i32)> {
            self.ledger
                .status(queue_id)
                .await
                .unwrap()
                .participants
                .into_iter()
                .map(|p| (p.user_id.0, p.position))
                .collect()
        }
    }

    /// Drain already-delivered frames. The status round trip orders this
    /// after every publish issued so far.
    async fn drain(hub: &HubHandle, rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<serde_json::Value> {
        hub.status().await.unwrap();
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            events.push(serde_json::from_str(&frame).unwrap());
        }
        events
    }

    #[tokio::test]
    async fn test_scenario_join_join_leave() {
        let f = Fixture::new();
        let queue = f.open_queue().await;
        let mut rx = f.subscribe(queue.id).await;

        assert_eq!(f.ledger.join(queue.id, UserId(1)).await.unwrap(), 1);
        assert_eq!(f.ledger.join(queue.id, UserId(2)).await.unwrap(), 2);
        assert_eq!(f.ledger.leave(queue.id, UserId(1)).await.unwrap(), 1);

        assert_eq!(f.positions(queue.id).await, vec![(2, 1)]);

        let events = drain(&f.hub, &mut rx).await;
        assert_eq!(events.len(), 3);
        let types: Vec<&str> = events
            .iter()
            .map(|e| e["event_type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["user_joined", "user_joined", "user_left"]);

        let left = events.last().unwrap();
        assert_eq!(left["data"]["user_id"], 1);
        assert_eq!(left["data"]["left_position"], 1);

        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_join_closed_queue_is_inactive_without_side_effects() {
        let f = Fixture::new();
        let queue = f.queue(-60, -1, None).await;
        let mut rx = f.subscribe(queue.id).await;

        let result = f.ledger.join(queue.id, UserId(1)).await;
        assert!(matches!(result, Err(QueueError::Inactive)));
        assert!(f.store.entries(queue.id).await.is_empty());
        assert!(drain(&f.hub, &mut rx).await.is_empty());

        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_join_before_open_is_inactive() {
        let f = Fixture::new();
        let queue = f.queue(10, 60, None).await;

        let result = f.ledger.join(queue.id, UserId(1)).await;
        assert!(matches!(result, Err(QueueError::Inactive)));

        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_join_window_bounds_are_inclusive() {
        let f = Fixture::new();
        let queue = f.open_queue().await;

        assert!(f
            .ledger
            .join_at(queue.id, UserId(1), queue.opens_at)
            .await
            .is_ok());
        assert!(f
            .ledger
            .join_at(queue.id, UserId(2), queue.closes_at)
            .await
            .is_ok());

        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_duplicate_join_is_already_member() {
        let f = Fixture::new();
        let queue = f.open_queue().await;

        f.ledger.join(queue.id, UserId(1)).await.unwrap();
        let result = f.ledger.join(queue.id, UserId(1)).await;

        assert!(matches!(result, Err(QueueError::AlreadyMember)));
        assert_eq!(f.positions(queue.id).await, vec![(1, 1)]);

        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_join_unknown_queue() {
        let f = Fixture::new();
        let result = f.ledger.join(QueueId(404), UserId(1)).await;
        assert!(matches!(result, Err(QueueError::NotFound)));

        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_inactive_is_checked_before_membership() {
        let f = Fixture::new();
        let queue = f.queue(-60, -1, None).await;
        f.store
            .append_entry(queue.id, UserId(2), queue.opens_at)
            .await
            .unwrap();

        let result = f.ledger.join(queue.id, UserId(2)).await;
        assert!(matches!(result, Err(QueueError::Inactive)));

        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_full_queue_rejects_join() {
        let f = Fixture::new();
        let queue = f.queue(-5, 60, Some(2)).await;

        f.ledger.join(queue.id, UserId(1)).await.unwrap();
        f.ledger.join(queue.id, UserId(2)).await.unwrap();
        let result = f.ledger.join(queue.id, UserId(3)).await;
        assert!(matches!(result, Err(QueueError::QueueFull)));

        // A leave frees a slot.
        f.ledger.leave(queue.id, UserId(1)).await.unwrap();
        assert_eq!(f.ledger.join(queue.id, UserId(3)).await.unwrap(), 2);

        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_leave_without_membership() {
        let f = Fixture::new();
        let queue = f.open_queue().await;

        let result = f.ledger.leave(queue.id, UserId(9)).await;
        assert!(matches!(result, Err(QueueError::NotMember)));

        let missing = f.ledger.leave(QueueId(404), UserId(9)).await;
        assert!(matches!(missing, Err(QueueError::NotMember)));

        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_leave_middle_compacts_positions() {
        let f = Fixture::new();
        let queue = f.open_queue().await;
        for user in 1..=5 {
            f.ledger.join(queue.id, UserId(user)).await.unwrap();
        }

        assert_eq!(f.ledger.leave(queue.id, UserId(3)).await.unwrap(), 3);
        assert_eq!(
            f.positions(queue.id).await,
            vec![(1, 1), (2, 2), (4, 3), (5, 4)]
        );

        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_rejoin_lands_at_tail() {
        let f = Fixture::new();
        let queue = f.open_queue().await;

        f.ledger.join(queue.id, UserId(1)).await.unwrap();
        f.ledger.join(queue.id, UserId(2)).await.unwrap();
        f.ledger.leave(queue.id, UserId(1)).await.unwrap();
        assert_eq!(f.ledger.join(queue.id, UserId(1)).await.unwrap(), 2);

        assert_eq!(f.positions(queue.id).await, vec![(2, 1), (1, 2)]);
        let active = f
            .store
            .entries(queue.id)
            .await
            .into_iter()
            .filter(|e| e.user_id == UserId(1) && e.is_active())
            .count();
        assert_eq!(active, 1);

        f.hub.cancel();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_get_contiguous_positions() {
        let f = Fixture::new();
        let queue_id = f.open_queue().await.id;
        let mut rx = f.subscribe(queue_id).await;

        let tasks: Vec<_> = (1..=20)
            .map(|user| {
                let ledger = Arc::clone(&f.ledger);
                tokio::spawn(async move { ledger.join(queue_id, UserId(user)).await })
            })
            .collect();

        let mut positions = Vec::new();
        for task in tasks {
            positions.push(task.await.unwrap().unwrap());
        }
        positions.sort_unstable();
        assert_eq!(positions, (1..=20).collect::<Vec<i32>>());

        // Room order equals commit order.
        let broadcast: Vec<i64> = drain(&f.hub, &mut rx)
            .await
            .iter()
            .map(|e| e["data"]["position"].as_i64().unwrap())
            .collect();
        assert_eq!(broadcast, (1..=20).collect::<Vec<i64>>());

        f.hub.cancel();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_join_and_leave_keep_positions_contiguous() {
        let f = Fixture::new();
        let queue_id = f.open_queue().await.id;
        for user in 1..=10 {
            f.ledger.join(queue_id, UserId(user)).await.unwrap();
        }

        let mut tasks = Vec::new();
        for user in 1..=5 {
            let ledger = Arc::clone(&f.ledger);
            tasks.push(tokio::spawn(async move {
                ledger.leave(queue_id, UserId(user * 2)).await.map(|_| ())
            }));
        }
        for user in 11..=15 {
            let ledger = Arc::clone(&f.ledger);
            tasks.push(tokio::spawn(async move {
                ledger.join(queue_id, UserId(user)).await.map(|_| ())
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let positions: Vec<i32> = f
            .positions(queue_id)
            .await
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        assert_eq!(positions, (1..=10).collect::<Vec<i32>>());

        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_status_includes_names_in_order() {
        let f = Fixture::new();
        let queue = f.open_queue().await;
        f.store
            .insert_user(UserProfile {
                id: UserId(1),
                name: "Alan".to_string(),
                surname: "Turing".to_string(),
            })
            .await;
        f.store
            .insert_user(UserProfile {
                id: UserId(2),
                name: "Barbara".to_string(),
                surname: "Liskov".to_string(),
            })
            .await;
        f.ledger.join(queue.id, UserId(2)).await.unwrap();
        f.ledger.join(queue.id, UserId(1)).await.unwrap();

        let snapshot = f.ledger.status(queue.id).await.unwrap();
        assert_eq!(snapshot.queue_id, queue.id);
        assert!(snapshot.is_active);
        let names: Vec<&str> = snapshot
            .participants
            .iter()
            .map(|p| p.surname.as_str())
            .collect();
        assert_eq!(names, vec!["Liskov", "Turing"]);

        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_status_unknown_queue() {
        let f = Fixture::new();
        assert!(matches!(
            f.ledger.status(QueueId(1)).await,
            Err(QueueError::NotFound)
        ));
        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_join() {
        let f = Fixture::new();
        let queue = f.open_queue().await;
        let mut rx = f.subscribe(queue.id).await;
        f.store.set_unavailable(true);

        let result = f.ledger.join(queue.id, UserId(1)).await;
        assert!(matches!(result, Err(QueueError::Storage(_))));

        f.store.set_unavailable(false);
        assert!(f.store.entries(queue.id).await.is_empty());
        assert!(drain(&f.hub, &mut rx).await.is_empty());

        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_user_queues_lists_active_memberships() {
        let f = Fixture::new();
        let first = f.open_queue().await;
        let second = f.open_queue().await;

        f.ledger.join(first.id, UserId(1)).await.unwrap();
        f.ledger.join(second.id, UserId(1)).await.unwrap();
        f.ledger.leave(second.id, UserId(1)).await.unwrap();

        let items = f.ledger.user_queues(UserId(1)).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items.first().unwrap().queue_id, first.id);

        f.hub.cancel();
    }

    /// Delegating store whose `append_entry` parks until released, leaving
    /// a join suspended inside its critical section.
    struct GatedStore {
        inner: Arc<InMemoryQueueStore>,
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl QueueStore for GatedStore {
        async fn get_queue(&self, queue_id: QueueId) -> Result<Option<Queue>, QueueError> {
            self.inner.get_queue(queue_id).await
        }

        async fn find_active_entry(
            &self,
            queue_id: QueueId,
            user_id: UserId,
        ) -> Result<Option<QueueEntry>, QueueError> {
            self.inner.find_active_entry(queue_id, user_id).await
        }

        async fn count_active_entries(&self, queue_id: QueueId) -> Result<i64, QueueError> {
            self.inner.count_active_entries(queue_id).await
        }

        async fn append_entry(
            &self,
            queue_id: QueueId,
            user_id: UserId,
            now: DateTime<Utc>,
        ) -> Result<QueueEntry, QueueError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.append_entry(queue_id, user_id, now).await
        }

        async fn exit_entry(
            &self,
            queue_id: QueueId,
            user_id: UserId,
            exited_at: DateTime<Utc>,
        ) -> Result<Option<i32>, QueueError> {
            self.inner.exit_entry(queue_id, user_id, exited_at).await
        }

        async fn queue_snapshot(
            &self,
            queue_id: QueueId,
        ) -> Result<Option<QueueSnapshot>, QueueError> {
            self.inner.queue_snapshot(queue_id).await
        }

        async fn list_active_queues(&self) -> Result<Vec<Queue>, QueueError> {
            self.inner.list_active_queues().await
        }

        async fn expired_active_queues(&self, now: DateTime<Utc>) -> Result<Vec<Queue>, QueueError> {
            self.inner.expired_active_queues(now).await
        }

        async fn close_queue_if_expired(
            &self,
            queue_id: QueueId,
            now: DateTime<Utc>,
        ) -> Result<Option<Queue>, QueueError> {
            self.inner.close_queue_if_expired(queue_id, now).await
        }

        async fn upcoming_schedules_without_queue(
            &self,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<Schedule>, QueueError> {
            self.inner.upcoming_schedules_without_queue(from, to).await
        }

        async fn create_queue(&self, new_queue: NewQueue) -> Result<Option<Queue>, QueueError> {
            self.inner.create_queue(new_queue).await
        }

        async fn purge_schedules_ended_before(
            &self,
            cutoff: DateTime<Utc>,
        ) -> Result<u64, QueueError> {
            self.inner.purge_schedules_ended_before(cutoff).await
        }

        async fn purge_queues_closed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueError> {
            self.inner.purge_queues_closed_before(cutoff).await
        }

        async fn active_entries_for_user(
            &self,
            user_id: UserId,
        ) -> Result<Vec<UserQueueItem>, QueueError> {
            self.inner.active_entries_for_user(user_id).await
        }

        async fn ping(&self) -> Result<(), QueueError> {
            self.inner.ping().await
        }
    }

    struct GatedFixture {
        store: Arc<GatedStore>,
        hub: HubHandle,
        ledger: Arc<PositionLedger>,
        queue: Queue,
    }

    impl GatedFixture {
        async fn new() -> Self {
            Self::closing_in(Duration::minutes(30)).await
        }

        async fn closing_in(closes_in: Duration) -> Self {
            let inner = Arc::new(InMemoryQueueStore::new());
            let now = Utc::now();
            let queue = inner
                .insert_queue(NewQueue {
                    schedule_id: ScheduleId(1),
                    opens_at: now - Duration::minutes(30),
                    closes_at: now + closes_in,
                    is_active: true,
                    max_participants: None,
                })
                .await;
            let store = Arc::new(GatedStore {
                inner,
                entered: Notify::new(),
                release: Notify::new(),
            });
            let hub = HubHandle::new(CancellationToken::new());
            let ledger = Arc::new(PositionLedger::new(store.clone(), hub.clone()));
            Self {
                store,
                hub,
                ledger,
                queue,
            }
        }

        async fn subscribe(&self) -> mpsc::Receiver<OutboundFrame> {
            let (tx, rx) = mpsc::channel(64);
            self.hub.register(ConnectionId::new(), self.queue.id, tx).await;
            rx
        }

        /// Start a join at the last instant of the window and wait until it
        /// is parked inside the store.
        async fn start_join(&self, user_id: UserId) -> JoinHandle<Result<i32, QueueError>> {
            let ledger = Arc::clone(&self.ledger);
            let (queue_id, at) = (self.queue.id, self.queue.closes_at);
            let join = tokio::spawn(async move { ledger.join_at(queue_id, user_id, at).await });
            self.store.entered.notified().await;
            join
        }
    }

    fn event_types(events: &[serde_json::Value]) -> Vec<&str> {
        events
            .iter()
            .map(|e| e["event_type"].as_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_close_waits_for_in_flight_join() {
        let f = GatedFixture::new().await;
        let mut rx = f.subscribe().await;
        let join = f.start_join(UserId(1)).await;

        let close = {
            let ledger = Arc::clone(&f.ledger);
            let (queue_id, at) = (f.queue.id, f.queue.closes_at);
            tokio::spawn(async move { ledger.close_if_expired(queue_id, at).await })
        };
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(!close.is_finished());

        f.store.release.notify_one();
        assert_eq!(join.await.unwrap().unwrap(), 1);
        let closed = close.await.unwrap().unwrap().unwrap();
        assert!(!closed.is_active);

        let events = drain(&f.hub, &mut rx).await;
        assert_eq!(event_types(&events), vec!["user_joined", "queue_closed"]);

        // Nothing gets in once the close is announced.
        let late = f.ledger.join_at(f.queue.id, UserId(2), f.queue.closes_at).await;
        assert!(matches!(late, Err(QueueError::Inactive)));

        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_join_rejected_when_queue_closes_before_insert() {
        let f = GatedFixture::new().await;
        let mut rx = f.subscribe().await;
        let join = f.start_join(UserId(1)).await;

        // Closed outside this ledger, e.g. by another instance on the same database.
        f.store
            .inner
            .close_queue_if_expired(f.queue.id, f.queue.closes_at)
            .await
            .unwrap()
            .unwrap();

        f.store.release.notify_one();
        assert!(matches!(join.await.unwrap(), Err(QueueError::Inactive)));
        assert!(f.store.inner.entries(f.queue.id).await.is_empty());
        assert!(drain(&f.hub, &mut rx).await.is_empty());

        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_join_reads_clock_after_waiting_for_lock() {
        let f = GatedFixture::closing_in(Duration::milliseconds(100)).await;
        let first = f.start_join(UserId(1)).await;

        let second = {
            let ledger = Arc::clone(&f.ledger);
            let queue_id = f.queue.id;
            tokio::spawn(async move { ledger.join(queue_id, UserId(2)).await })
        };
        // The window ends while the second join is queued on the lock.
        tokio::time::sleep(StdDuration::from_millis(200)).await;
        assert!(Utc::now() > f.queue.closes_at);

        f.store.release.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), 1);
        let second = tokio::time::timeout(StdDuration::from_secs(5), second)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(second, Err(QueueError::Inactive)));

        f.hub.cancel();
    }

    #[tokio::test]
    async fn test_close_before_window_end_is_noop() {
        let f = Fixture::new();
        let queue = f.open_queue().await;
        let mut rx = f.subscribe(queue.id).await;

        let closed = f
            .ledger
            .close_if_expired(queue.id, queue.closes_at - Duration::seconds(1))
            .await
            .unwrap();
        assert!(closed.is_none());
        assert!(drain(&f.hub, &mut rx).await.is_empty());

        f.hub.cancel();
    }
}
