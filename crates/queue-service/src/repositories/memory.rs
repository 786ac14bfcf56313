//! In-memory implementation of [`QueueStore`].
//!
//! Used for local runs without `DATABASE_URL` and by tests. All state sits
//! behind one `RwLock`, so every trait method is atomic with respect to the
//! others, the same guarantee the Postgres store gets from transactions.
//!
//! Deleting a schedule removes its queues, and deleting a queue removes its
//! entries, mirroring the `ON DELETE CASCADE` foreign keys of the schema.

use super::store::QueueStore;
use crate::errors::QueueError;
use crate::models::{
    NewQueue, NewSchedule, Participant, Queue, QueueEntry, QueueSnapshot, Schedule,
    UserProfile, UserQueueItem,
};
use chrono::{DateTime, Utc};
use common::types::{QueueId, ScheduleId, UserId};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, UserProfile>,
    schedules: BTreeMap<ScheduleId, Schedule>,
    queues: BTreeMap<QueueId, Queue>,
    entries: Vec<QueueEntry>,
    next_schedule_id: i64,
    next_queue_id: i64,
    next_entry_id: i64,
}

impl MemoryState {
    fn active_entries(&self, queue_id: QueueId) -> impl Iterator<Item = &QueueEntry> {
        self.entries
            .iter()
            .filter(move |e| e.queue_id == queue_id && e.is_active())
    }

    fn participants(&self, queue_id: QueueId) -> Vec<Participant> {
        let mut participants: Vec<Participant> = self
            .active_entries(queue_id)
            .map(|entry| {
                let (name, surname) = self
                    .users
                    .get(&entry.user_id)
                    .map(|u| (u.name.clone(), u.surname.clone()))
                    .unwrap_or_default();
                Participant {
                    user_id: entry.user_id,
                    name,
                    surname,
                    position: entry.position,
                }
            })
            .collect();
        participants.sort_by_key(|p| p.position);
        participants
    }

    fn insert_queue(&mut self, new_queue: NewQueue) -> Queue {
        self.next_queue_id += 1;
        let queue = Queue {
            id: QueueId(self.next_queue_id),
            schedule_id: new_queue.schedule_id,
            opens_at: new_queue.opens_at,
            closes_at: new_queue.closes_at,
            is_active: new_queue.is_active,
            max_participants: new_queue.max_participants,
        };
        self.queues.insert(queue.id, queue.clone());
        queue
    }

    fn remove_queues(&mut self, doomed: &[QueueId]) {
        for queue_id in doomed {
            self.queues.remove(queue_id);
        }
        self.entries.retain(|e| !doomed.contains(&e.queue_id));
    }
}

/// Store keeping all rows in process memory.
#[derive(Default)]
pub struct InMemoryQueueStore {
    state: RwLock<MemoryState>,
    unavailable: AtomicBool,
}

impl InMemoryQueueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every trait method fail with a storage error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Storage("in-memory store unavailable".to_string()));
        }
        Ok(())
    }

    pub async fn insert_user(&self, user: UserProfile) {
        self.state.write().await.users.insert(user.id, user);
    }

    pub async fn insert_schedule(&self, new_schedule: NewSchedule) -> Schedule {
        let mut state = self.state.write().await;
        state.next_schedule_id += 1;
        let schedule = Schedule {
            id: ScheduleId(state.next_schedule_id),
            external_id: new_schedule.external_id,
            name: new_schedule.name,
            start_time: new_schedule.start_time,
            end_time: new_schedule.end_time,
            group_ids: new_schedule.group_ids,
        };
        state.schedules.insert(schedule.id, schedule.clone());
        schedule
    }

    /// Insert a queue without the one-queue-per-schedule check.
    pub async fn insert_queue(&self, new_queue: NewQueue) -> Queue {
        self.state.write().await.insert_queue(new_queue)
    }

    /// Every entry of a queue, exited ones included, in insertion order.
    pub async fn entries(&self, queue_id: QueueId) -> Vec<QueueEntry> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .filter(|e| e.queue_id == queue_id)
            .cloned()
            .collect()
    }

    pub async fn schedule_count(&self) -> usize {
        self.state.read().await.schedules.len()
    }
}

#[async_trait::async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn get_queue(&self, queue_id: QueueId) -> Result<Option<Queue>, QueueError> {
        self.check_available()?;
        Ok(self.state.read().await.queues.get(&queue_id).cloned())
    }

    async fn find_active_entry(
        &self,
        queue_id: QueueId,
        user_id: UserId,
    ) -> Result<Option<QueueEntry>, QueueError> {
        self.check_available()?;
        let state = self.state.read().await;
        let entry = state
            .active_entries(queue_id)
            .find(|e| e.user_id == user_id)
            .cloned();
        Ok(entry)
    }

    async fn count_active_entries(&self, queue_id: QueueId) -> Result<i64, QueueError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.active_entries(queue_id).count() as i64)
    }

    async fn append_entry(
        &self,
        queue_id: QueueId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, QueueError> {
        self.check_available()?;
        let mut state = self.state.write().await;

        match state.queues.get(&queue_id) {
            None => return Err(QueueError::NotFound),
            Some(queue) if !queue.is_open_at(now) => return Err(QueueError::Inactive),
            Some(_) => {}
        }
        if state.active_entries(queue_id).any(|e| e.user_id == user_id) {
            return Err(QueueError::AlreadyMember);
        }

        let position = state
            .active_entries(queue_id)
            .map(|e| e.position)
            .max()
            .unwrap_or(0)
            + 1;

        state.next_entry_id += 1;
        let entry = QueueEntry {
            id: state.next_entry_id,
            user_id,
            queue_id,
            position,
            exited_at: None,
        };
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn exit_entry(
        &self,
        queue_id: QueueId,
        user_id: UserId,
        exited_at: DateTime<Utc>,
    ) -> Result<Option<i32>, QueueError> {
        self.check_available()?;
        let mut state = self.state.write().await;

        let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| e.queue_id == queue_id && e.user_id == user_id && e.is_active())
        else {
            return Ok(None);
        };
        entry.exited_at = Some(exited_at);
        let left_position = entry.position;

        for later in state
            .entries
            .iter_mut()
            .filter(|e| e.queue_id == queue_id && e.is_active() && e.position > left_position)
        {
            later.position -= 1;
        }

        Ok(Some(left_position))
    }

    async fn queue_snapshot(&self, queue_id: QueueId) -> Result<Option<QueueSnapshot>, QueueError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .queues
            .get(&queue_id)
            .map(|queue| QueueSnapshot::new(queue, state.participants(queue_id))))
    }

    async fn list_active_queues(&self) -> Result<Vec<Queue>, QueueError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.queues.values().filter(|q| q.is_active).cloned().collect())
    }

    async fn expired_active_queues(&self, now: DateTime<Utc>) -> Result<Vec<Queue>, QueueError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .queues
            .values()
            .filter(|q| q.is_active && q.closes_at <= now)
            .cloned()
            .collect())
    }

    async fn close_queue_if_expired(
        &self,
        queue_id: QueueId,
        now: DateTime<Utc>,
    ) -> Result<Option<Queue>, QueueError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.queues.get_mut(&queue_id) {
            Some(queue) if queue.is_active && queue.closes_at <= now => {
                queue.is_active = false;
                Ok(Some(queue.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn upcoming_schedules_without_queue(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Schedule>, QueueError> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut schedules: Vec<Schedule> = state
            .schedules
            .values()
            .filter(|s| from <= s.start_time && s.start_time <= to)
            .filter(|s| !state.queues.values().any(|q| q.schedule_id == s.id))
            .cloned()
            .collect();
        schedules.sort_by_key(|s| (s.start_time, s.id));
        Ok(schedules)
    }

    async fn create_queue(&self, new_queue: NewQueue) -> Result<Option<Queue>, QueueError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if state
            .queues
            .values()
            .any(|q| q.schedule_id == new_queue.schedule_id)
        {
            return Ok(None);
        }
        Ok(Some(state.insert_queue(new_queue)))
    }

    async fn purge_schedules_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueError> {
        self.check_available()?;
        let mut state = self.state.write().await;

        let doomed_schedules: Vec<ScheduleId> = state
            .schedules
            .values()
            .filter(|s| s.end_time < cutoff)
            .map(|s| s.id)
            .collect();
        for schedule_id in &doomed_schedules {
            state.schedules.remove(schedule_id);
        }

        let doomed_queues: Vec<QueueId> = state
            .queues
            .values()
            .filter(|q| doomed_schedules.contains(&q.schedule_id))
            .map(|q| q.id)
            .collect();
        state.remove_queues(&doomed_queues);

        Ok(doomed_schedules.len() as u64)
    }

    async fn purge_queues_closed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let doomed: Vec<QueueId> = state
            .queues
            .values()
            .filter(|q| !q.is_active && q.closes_at < cutoff)
            .map(|q| q.id)
            .collect();
        state.remove_queues(&doomed);
        Ok(doomed.len() as u64)
    }

    async fn active_entries_for_user(&self, user_id: UserId) -> Result<Vec<UserQueueItem>, QueueError> {
        self.check_available()?;
        let state = self.state.read().await;

        let mut items: Vec<UserQueueItem> = state
            .entries
            .iter()
            .filter(|e| e.user_id == user_id && e.is_active())
            .filter_map(|entry| {
                let queue = state.queues.get(&entry.queue_id)?;
                let schedule = state.schedules.get(&queue.schedule_id)?;
                Some(UserQueueItem {
                    queue_id: queue.id,
                    position: entry.position,
                    schedule_id: schedule.id,
                    schedule_name: schedule.name.clone(),
                    start_time: schedule.start_time,
                    end_time: schedule.end_time,
                    group_ids: schedule.group_id_list(),
                    opens_at: queue.opens_at,
                    closes_at: queue.closes_at,
                    is_active: queue.is_active,
                })
            })
            .collect();
        items.sort_by_key(|i| (i.start_time, i.queue_id));
        Ok(items)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.check_available()
    }
}
