//! Common types shared across the queue service crates.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for identifier newtypes
pub mod types;

/// Module for logging configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;
