//! Close queues whose window has ended.
//!
//! Each queue is flipped by a single conditional update and announced in
//! the same step, under the ledger's per-queue mutex. Only the call that
//! actually changed the queue announces it, so each queue is closed, and
//! `queue_closed` is broadcast, exactly once no matter how often or how
//! concurrently the job runs. A run cut short leaves the remaining queues
//! active for the next tick.

use crate::errors::QueueError;
use crate::ledger::PositionLedger;
use chrono::{DateTime, Utc};
use tracing::{info, instrument};

pub const JOB_NAME: &str = "close_expired_queues";

/// One run. Returns the number of queues closed.
#[instrument(skip_all, name = "qs.task.close_expired_queues")]
pub async fn run_close_expired_queues(
    ledger: &PositionLedger,
    now: DateTime<Utc>,
) -> Result<u64, QueueError> {
    let expired = ledger.store().expired_active_queues(now).await?;

    let mut closed = 0u64;
    for queue in expired {
        if let Some(queue) = ledger.close_if_expired(queue.id, now).await? {
            closed += 1;
            info!(
                target: "qs.task.close_expired_queues",
                queue_id = %queue.id,
                closes_at = %queue.closes_at,
                "Closed expired queue"
            );
        }
    }

    Ok(closed)
}
