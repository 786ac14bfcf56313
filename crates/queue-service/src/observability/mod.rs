//! Observability for the queue service.
//!
//! Provides metrics definitions and the Prometheus recorder.

pub mod metrics;
