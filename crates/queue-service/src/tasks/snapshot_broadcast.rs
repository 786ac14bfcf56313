//! Periodic `queue_update` for every active queue.
//!
//! Lets subscribers converge on the authoritative ordering even if they
//! missed an incremental event.

use crate::errors::QueueError;
use crate::ledger::PositionLedger;
use tracing::{instrument, warn};

pub const JOB_NAME: &str = "broadcast_active_snapshots";

/// One run. Returns the number of snapshots published.
///
/// A queue that fails (closed or deleted mid-run, storage hiccup) is logged
/// and skipped. Only a failure to list the queues fails the run.
#[instrument(skip_all, name = "qs.task.broadcast_active_snapshots")]
pub async fn run_broadcast_active_snapshots(ledger: &PositionLedger) -> Result<u64, QueueError> {
    let queues = ledger.store().list_active_queues().await?;

    let mut published = 0u64;
    for queue in queues {
        match ledger.publish_snapshot(queue.id).await {
            Ok(()) => published += 1,
            Err(e) => warn!(
                target: "qs.task.broadcast_active_snapshots",
                queue_id = %queue.id,
                error = %e,
                "Failed to publish queue snapshot"
            ),
        }
    }

    Ok(published)
}
