//! Open queues for upcoming scheduled events.
//!
//! Every schedule starting within the open window gets one queue that opens
//! now and closes when the event starts. Schedules that already have a queue
//! are skipped, and `create_queue` is a no-op on a concurrent duplicate, so
//! the job can run any number of times.

use crate::errors::QueueError;
use crate::models::NewQueue;
use crate::repositories::QueueStore;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, instrument};

pub const JOB_NAME: &str = "open_upcoming_queues";

/// One run. Returns the number of queues created.
#[instrument(skip_all, name = "qs.task.open_upcoming_queues")]
pub async fn run_open_upcoming_queues(
    store: &dyn QueueStore,
    open_window: Duration,
    now: DateTime<Utc>,
) -> Result<u64, QueueError> {
    let window = chrono::Duration::from_std(open_window)
        .map_err(|e| QueueError::Internal(format!("open window out of range: {e}")))?;
    let schedules = store
        .upcoming_schedules_without_queue(now, now + window)
        .await?;

    let mut created = 0u64;
    for schedule in schedules {
        let queue = store
            .create_queue(NewQueue {
                schedule_id: schedule.id,
                opens_at: now,
                closes_at: schedule.start_time,
                is_active: true,
                max_participants: None,
            })
            .await?;

        match queue {
            Some(queue) => {
                created += 1;
                info!(
                    target: "qs.task.open_upcoming_queues",
                    queue_id = %queue.id,
                    schedule_id = %schedule.id,
                    closes_at = %queue.closes_at,
                    "Opened queue for upcoming event"
                );
            }
            None => debug!(
                target: "qs.task.open_upcoming_queues",
                schedule_id = %schedule.id,
                "Queue already exists for schedule"
            ),
        }
    }

    Ok(created)
}
