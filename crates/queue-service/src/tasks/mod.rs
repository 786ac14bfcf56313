//! Background scheduler for queue lifecycle.
//!
//! Four independent jobs, each on its own interval:
//!
//! - [`open_queues`] opens queues for events starting within the open window.
//! - [`close_expired`] closes queues past `closes_at` and announces them.
//! - [`snapshot_broadcast`] re-broadcasts the full state of active queues.
//! - [`purge_stale`] deletes rows past their retention.
//!
//! Every job is idempotent; concurrent or repeated runs are safe.

pub mod close_expired;
pub mod open_queues;
mod periodic;
pub mod purge_stale;
pub mod snapshot_broadcast;

pub use close_expired::run_close_expired_queues;
pub use open_queues::run_open_upcoming_queues;
pub use periodic::run_periodic;
pub use purge_stale::run_purge_stale;
pub use snapshot_broadcast::run_broadcast_active_snapshots;

use crate::config::SchedulerConfig;
use crate::ledger::PositionLedger;
use crate::repositories::QueueStore;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawn all scheduler jobs. They stop when `cancel_token` fires.
pub fn start_scheduler(
    store: Arc<dyn QueueStore>,
    ledger: Arc<PositionLedger>,
    config: &SchedulerConfig,
    cancel_token: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(4);

    let open_store = Arc::clone(&store);
    let open_window = config.open_window;
    handles.push(tokio::spawn(run_periodic(
        open_queues::JOB_NAME,
        config.open_interval,
        config.job_timeout,
        cancel_token.child_token(),
        move || {
            let store = Arc::clone(&open_store);
            async move { run_open_upcoming_queues(store.as_ref(), open_window, Utc::now()).await }
        },
    )));

    let close_ledger = Arc::clone(&ledger);
    handles.push(tokio::spawn(run_periodic(
        close_expired::JOB_NAME,
        config.close_interval,
        config.job_timeout,
        cancel_token.child_token(),
        move || {
            let ledger = Arc::clone(&close_ledger);
            async move { run_close_expired_queues(&ledger, Utc::now()).await }
        },
    )));

    handles.push(tokio::spawn(run_periodic(
        snapshot_broadcast::JOB_NAME,
        config.snapshot_interval,
        config.job_timeout,
        cancel_token.child_token(),
        move || {
            let ledger = Arc::clone(&ledger);
            async move { run_broadcast_active_snapshots(&ledger).await }
        },
    )));

    let purge_store = store;
    let schedule_retention = config.schedule_retention;
    let queue_retention = config.queue_retention;
    handles.push(tokio::spawn(run_periodic(
        purge_stale::JOB_NAME,
        config.purge_interval,
        config.job_timeout,
        cancel_token.child_token(),
        move || {
            let store = Arc::clone(&purge_store);
            async move {
                run_purge_stale(store.as_ref(), schedule_retention, queue_retention, Utc::now())
                    .await
            }
        },
    )));

    handles
}
