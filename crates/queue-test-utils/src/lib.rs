//! # Queue Test Utilities
//!
//! Shared test utilities for the queue service.
//!
//! This crate provides:
//! - Server test harness (`TestQueueServer` for end-to-end tests)
//! - Fixture builders for schedules, queues and users in the in-memory store
//!
//! ## Usage
//!
//! ```rust,ignore
//! use queue_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestQueueServer::spawn().await?;
//!     let queue = QueueFixture::open().insert(server.store()).await;
//!
//!     let response = server
//!         .post(&format!("/api/v1/queues/{}/join", queue.id), TEST_USER_ALICE)
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod server_harness;

pub use fixtures::*;
pub use server_harness::*;
