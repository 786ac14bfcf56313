//! Deterministic fixtures for the in-memory store.

use chrono::{Duration, Utc};
use common::types::{QueueId, UserId};
use queue_service::models::{NewQueue, NewSchedule, Queue, Schedule, UserProfile};
use queue_service::repositories::InMemoryQueueStore;
use std::sync::atomic::{AtomicU64, Ordering};

pub const TEST_USER_ALICE: UserId = UserId(100);
pub const TEST_USER_BOB: UserId = UserId(101);
pub const TEST_USER_CAROL: UserId = UserId(102);

/// A queue id no fixture ever creates.
pub const UNKNOWN_QUEUE: QueueId = QueueId(999_999);

static EXTERNAL_ID_SEQ: AtomicU64 = AtomicU64::new(1);

/// Insert the standard test users with names.
pub async fn insert_test_users(store: &InMemoryQueueStore) {
    for (id, name, surname) in [
        (TEST_USER_ALICE, "Alice", "Archer"),
        (TEST_USER_BOB, "Bob", "Baker"),
        (TEST_USER_CAROL, "Carol", "Cooper"),
    ] {
        store
            .insert_user(UserProfile {
                id,
                name: name.to_string(),
                surname: surname.to_string(),
            })
            .await;
    }
}

/// Builder for a schedule plus its queue.
///
/// Offsets are relative to the moment [`QueueFixture::insert`] runs.
#[derive(Debug, Clone)]
pub struct QueueFixture {
    opens_in: Duration,
    closes_in: Duration,
    is_active: bool,
    max_participants: Option<i32>,
    group_ids: String,
}

impl QueueFixture {
    /// Opened an hour ago, closes in an hour.
    pub fn open() -> Self {
        Self {
            opens_in: Duration::hours(-1),
            closes_in: Duration::hours(1),
            is_active: true,
            max_participants: None,
            group_ids: "101,102".to_string(),
        }
    }

    /// Window ended a minute ago but the close job has not run yet.
    pub fn expired() -> Self {
        Self {
            opens_in: Duration::hours(-2),
            closes_in: Duration::minutes(-1),
            ..Self::open()
        }
    }

    /// Already flipped to inactive.
    pub fn closed() -> Self {
        Self {
            is_active: false,
            ..Self::expired()
        }
    }

    pub fn max_participants(mut self, limit: i32) -> Self {
        self.max_participants = Some(limit);
        self
    }

    pub fn group_ids(mut self, group_ids: &str) -> Self {
        self.group_ids = group_ids.to_string();
        self
    }

    /// Insert the schedule and queue; the event starts when the queue closes.
    pub async fn insert(self, store: &InMemoryQueueStore) -> Queue {
        self.insert_with_schedule(store).await.0
    }

    pub async fn insert_with_schedule(self, store: &InMemoryQueueStore) -> (Queue, Schedule) {
        let now = Utc::now();
        let start_time = now + self.closes_in;
        let seq = EXTERNAL_ID_SEQ.fetch_add(1, Ordering::Relaxed);

        let schedule = store
            .insert_schedule(NewSchedule {
                external_id: format!("fixture-{seq}"),
                name: format!("Fixture event {seq}"),
                start_time,
                end_time: start_time + Duration::minutes(90),
                group_ids: self.group_ids,
            })
            .await;

        let queue = store
            .insert_queue(NewQueue {
                schedule_id: schedule.id,
                opens_at: now + self.opens_in,
                closes_at: start_time,
                is_active: self.is_active,
                max_participants: self.max_participants,
            })
            .await;

        (queue, schedule)
    }
}
