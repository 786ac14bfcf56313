//! Storage layer.
//!
//! [`QueueStore`] is the seam between queue logic and persistence. The
//! service runs on [`PgQueueStore`] when `DATABASE_URL` is set and on
//! [`InMemoryQueueStore`] otherwise.

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryQueueStore;
pub use postgres::PgQueueStore;
pub use store::QueueStore;
