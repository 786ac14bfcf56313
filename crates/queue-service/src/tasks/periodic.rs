//! Shared loop for the scheduler jobs.
//!
//! Each job runs on its own interval. A tick is awaited inside the loop under
//! a timeout, so two runs of the same job never overlap; ticks missed while a
//! run is in progress are skipped. A failed or timed-out run is logged and
//! the loop carries on.
//!
//! # Graceful Shutdown
//!
//! When the cancellation token is triggered the loop finishes the current
//! run, if any, and exits.

use crate::errors::QueueError;
use crate::observability::metrics::{record_job_items, record_job_run};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Run `run_once` every `period` until `cancel_token` fires.
///
/// `run_once` returns the number of items the run affected. The first run
/// happens immediately.
pub async fn run_periodic<F, Fut>(
    job: &'static str,
    period: Duration,
    job_timeout: Duration,
    cancel_token: CancellationToken,
    mut run_once: F,
) where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<u64, QueueError>> + Send,
{
    info!(
        target: "qs.task",
        job,
        period_secs = period.as_secs(),
        timeout_secs = job_timeout.as_secs(),
        "Starting scheduler job"
    );

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let start = Instant::now();
                match tokio::time::timeout(job_timeout, run_once()).await {
                    Ok(Ok(items)) => {
                        record_job_run(job, "success", start.elapsed());
                        record_job_items(job, items);
                        if items > 0 {
                            info!(target: "qs.task", job, items, "Scheduler job run completed");
                        } else {
                            debug!(target: "qs.task", job, "Scheduler job run found nothing to do");
                        }
                    }
                    Ok(Err(e)) => {
                        record_job_run(job, "error", start.elapsed());
                        error!(target: "qs.task", job, error = %e, "Scheduler job run failed");
                    }
                    Err(_) => {
                        record_job_run(job, "timeout", start.elapsed());
                        warn!(
                            target: "qs.task",
                            job,
                            timeout_secs = job_timeout.as_secs(),
                            "Scheduler job run timed out"
                        );
                    }
                }
            }
            () = cancel_token.cancelled() => {
                info!(target: "qs.task", job, "Scheduler job received shutdown signal, exiting");
                break;
            }
        }
    }

    info!(target: "qs.task", job, "Scheduler job stopped");
}
