//! Queue lifecycle integration tests.
//!
//! Runs the scheduler jobs against the server's store and checks the effect
//! through the HTTP surface.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{Duration, Utc};
use queue_service::models::NewSchedule;
use queue_service::repositories::QueueStore;
use queue_service::tasks::{run_close_expired_queues, run_open_upcoming_queues, run_purge_stale};
use queue_test_utils::{TestQueueServer, TEST_USER_ALICE};
use serde_json::Value;

#[tokio::test]
async fn test_opened_queue_accepts_joins_until_closed() -> Result<(), anyhow::Error> {
    let server = TestQueueServer::spawn().await?;
    let now = Utc::now();
    server
        .store()
        .insert_schedule(NewSchedule {
            external_id: "lecture-1".to_string(),
            name: "Operating Systems".to_string(),
            start_time: now + Duration::hours(4),
            end_time: now + Duration::hours(6),
            group_ids: "301".to_string(),
        })
        .await;

    let window = server.config().scheduler.open_window;
    assert_eq!(run_open_upcoming_queues(server.store(), window, now).await?, 1);
    assert_eq!(run_open_upcoming_queues(server.store(), window, now).await?, 0);

    let queue = server
        .store()
        .list_active_queues()
        .await?
        .into_iter()
        .next()
        .unwrap();

    let join = server
        .post(&format!("/api/v1/queues/{}/join", queue.id), TEST_USER_ALICE)
        .await?;
    assert_eq!(join.status(), 200);

    // The event starts: the close job runs after `closes_at`.
    let after_start = queue.closes_at + Duration::seconds(1);
    assert_eq!(
        run_close_expired_queues(server.ledger(), after_start).await?,
        1
    );

    let status = server
        .get(&format!("/api/v1/queues/{}/status", queue.id), TEST_USER_ALICE)
        .await?;
    let body: Value = status.json().await?;
    assert_eq!(body["is_active"], false);
    // Closing does not remove memberships.
    assert_eq!(body["participants"].as_array().unwrap().len(), 1);

    let leave = server
        .post(&format!("/api/v1/queues/{}/leave", queue.id), TEST_USER_ALICE)
        .await?;
    assert_eq!(leave.status(), 200);

    Ok(())
}

#[tokio::test]
async fn test_purge_removes_closed_queue_and_old_schedule() -> Result<(), anyhow::Error> {
    let server = TestQueueServer::spawn().await?;
    let now = Utc::now();
    server
        .store()
        .insert_schedule(NewSchedule {
            external_id: "lecture-old".to_string(),
            name: "Compilers".to_string(),
            start_time: now + Duration::minutes(10),
            end_time: now + Duration::hours(2),
            group_ids: String::new(),
        })
        .await;

    let window = server.config().scheduler.open_window;
    run_open_upcoming_queues(server.store(), window, now).await?;
    let queue = server
        .store()
        .list_active_queues()
        .await?
        .into_iter()
        .next()
        .unwrap();

    // Two days later.
    let later = now + Duration::days(2);
    run_close_expired_queues(server.ledger(), later).await?;
    let scheduler = &server.config().scheduler;
    let deleted = run_purge_stale(
        server.store(),
        scheduler.schedule_retention,
        scheduler.queue_retention,
        later,
    )
    .await?;
    assert!(deleted >= 1);
    assert_eq!(server.store().schedule_count().await, 0);

    let status = server
        .get(&format!("/api/v1/queues/{}/status", queue.id), TEST_USER_ALICE)
        .await?;
    assert_eq!(status.status(), 404);

    Ok(())
}
