//! HTTP request handlers for the queue service.

pub mod health;
pub mod metrics;
pub mod profile;
pub mod queues;
pub mod ws;

pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;
pub use profile::my_queues;
pub use queues::{join_queue, leave_queue, queue_status};
pub use ws::queue_socket;
