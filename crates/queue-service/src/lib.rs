//! Queue Service Library
//!
//! Live waiting queues for scheduled events. Users join and leave a queue
//! over HTTP and watch it over a WebSocket room; a background scheduler
//! opens queues ahead of each event and closes them when it starts.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> ledger -> repositories/*.rs
//!                                      \-> hub (actor) -> connection endpoints
//! tasks/*.rs -> repositories/*.rs, hub, ledger
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP and WebSocket request handlers
//! - `hub` - Room broadcast sequencer and WebSocket connection loops
//! - `ledger` - Position assignment and compaction
//! - `middleware` - Identity and HTTP metrics layers
//! - `models` - Data models
//! - `observability` - Prometheus metrics
//! - `repositories` - Store trait with Postgres and in-memory implementations
//! - `routes` - Axum router setup
//! - `tasks` - Queue lifecycle scheduler

pub mod config;
pub mod errors;
pub mod handlers;
pub mod hub;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod tasks;
