//! Retention purge for schedules and closed queues.
//!
//! Deleting a schedule cascades to its queue and entries. Queues are only
//! purged once inactive, so a queue is never removed before the close job
//! has announced it.

use crate::errors::QueueError;
use crate::repositories::QueueStore;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, instrument};

pub const JOB_NAME: &str = "purge_stale";

/// One run. Returns the number of schedule and queue rows deleted.
///
/// Both purges are attempted; the first error is returned.
#[instrument(skip_all, name = "qs.task.purge_stale")]
pub async fn run_purge_stale(
    store: &dyn QueueStore,
    schedule_retention: Duration,
    queue_retention: Duration,
    now: DateTime<Utc>,
) -> Result<u64, QueueError> {
    let schedules = match cutoff(now, schedule_retention) {
        Ok(cutoff) => store.purge_schedules_ended_before(cutoff).await,
        Err(e) => Err(e),
    };
    let queues = match cutoff(now, queue_retention) {
        Ok(cutoff) => store.purge_queues_closed_before(cutoff).await,
        Err(e) => Err(e),
    };

    let schedules = schedules?;
    let queues = queues?;

    if schedules + queues > 0 {
        info!(
            target: "qs.task.purge_stale",
            schedules,
            queues,
            "Purged stale rows"
        );
    }

    Ok(schedules + queues)
}

fn cutoff(now: DateTime<Utc>, retention: Duration) -> Result<DateTime<Utc>, QueueError> {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|retention| now.checked_sub_signed(retention))
        .ok_or_else(|| QueueError::Internal(format!("retention out of range: {retention:?}")))
}
