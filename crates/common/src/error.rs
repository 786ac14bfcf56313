//! Common error types for the queue service crates.

use thiserror::Error;

/// Errors that can occur below the service layer.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Identifier could not be parsed
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Serialization(err.to_string())
    }
}
