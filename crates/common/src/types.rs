//! Identifier newtypes shared across the queue service crates.
//!
//! Queue, user and schedule identifiers are database-assigned integers.
//! Connection identifiers are generated per WebSocket session.

use crate::error::ServiceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ServiceError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<i64>()
                    .ok()
                    .filter(|v| *v > 0)
                    .map(Self)
                    .ok_or_else(|| ServiceError::InvalidId(s.to_string()))
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

integer_id!(
    /// Unique identifier for a queue. Doubles as the hub room identifier.
    QueueId
);

integer_id!(
    /// Unique identifier for an authenticated user
    UserId
);

integer_id!(
    /// Unique identifier for a scheduled event
    ScheduleId
);

/// Unique identifier for a live WebSocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_id_parses_positive_integers() {
        assert_eq!("42".parse::<QueueId>().ok(), Some(QueueId(42)));
        assert_eq!(" 7 ".parse::<QueueId>().ok(), Some(QueueId(7)));
    }

    #[test]
    fn test_queue_id_rejects_garbage() {
        assert!("abc".parse::<QueueId>().is_err());
        assert!("0".parse::<QueueId>().is_err());
        assert!("-3".parse::<QueueId>().is_err());
        assert!("".parse::<QueueId>().is_err());
    }

    #[test]
    fn test_ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&UserId(9)).unwrap_or_default();
        assert_eq!(json, "9");
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
