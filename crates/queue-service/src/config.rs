//! Queue service configuration.
//!
//! Configuration is loaded from environment variables. The database URL is
//! redacted in Debug output.

use common::config::ObservabilityConfig;
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default per-connection outbound mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Default server ping interval in seconds.
pub const DEFAULT_PING_INTERVAL_SECONDS: u64 = 54;

/// Default idle read timeout in seconds. Must exceed the ping interval.
pub const DEFAULT_READ_TIMEOUT_SECONDS: u64 = 60;

/// Default deadline for a single outbound write in seconds.
pub const DEFAULT_WRITE_TIMEOUT_SECONDS: u64 = 10;

/// Default inbound message size limit in bytes.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 512;

pub const DEFAULT_OPEN_INTERVAL_SECONDS: u64 = 300;
pub const DEFAULT_CLOSE_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_SNAPSHOT_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_PURGE_INTERVAL_SECONDS: u64 = 86_400;

/// Forward window for opening queues: 28 hours plus 5 minutes of slack.
pub const DEFAULT_OPEN_WINDOW_MINUTES: u64 = 28 * 60 + 5;

/// Schedules whose end time is older than this are purged.
pub const DEFAULT_SCHEDULE_RETENTION_HOURS: u64 = 24;

/// Queues whose close time is older than this are purged.
pub const DEFAULT_QUEUE_RETENTION_HOURS: u64 = 0;

/// Upper bound for a single job tick.
pub const DEFAULT_JOB_TIMEOUT_SECONDS: u64 = 30;

/// WebSocket connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Outbound mailbox capacity per connection.
    pub mailbox_capacity: usize,
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// Idle read deadline, renewed by every inbound frame.
    pub read_timeout: Duration,
    /// Deadline for a single outbound write.
    pub write_timeout: Duration,
    /// Inbound message size limit.
    pub max_message_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECONDS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECONDS),
            write_timeout: Duration::from_secs(DEFAULT_WRITE_TIMEOUT_SECONDS),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

/// Lifecycle scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub open_interval: Duration,
    pub close_interval: Duration,
    pub snapshot_interval: Duration,
    pub purge_interval: Duration,
    /// How far ahead of now an event start may be for its queue to open.
    pub open_window: Duration,
    pub schedule_retention: Duration,
    pub queue_retention: Duration,
    pub job_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            open_interval: Duration::from_secs(DEFAULT_OPEN_INTERVAL_SECONDS),
            close_interval: Duration::from_secs(DEFAULT_CLOSE_INTERVAL_SECONDS),
            snapshot_interval: Duration::from_secs(DEFAULT_SNAPSHOT_INTERVAL_SECONDS),
            purge_interval: Duration::from_secs(DEFAULT_PURGE_INTERVAL_SECONDS),
            open_window: Duration::from_secs(DEFAULT_OPEN_WINDOW_MINUTES * 60),
            schedule_retention: Duration::from_secs(DEFAULT_SCHEDULE_RETENTION_HOURS * 3600),
            queue_retention: Duration::from_secs(DEFAULT_QUEUE_RETENTION_HOURS * 3600),
            job_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECONDS),
        }
    }
}

/// Queue service configuration.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL. `None` selects the in-memory store.
    pub database_url: Option<SecretString>,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// WebSocket connection settings.
    pub connection: ConnectionConfig,

    /// Lifecycle scheduler settings.
    pub scheduler: SchedulerConfig,

    /// Seconds to wait after a shutdown signal before stopping (default: 0).
    pub drain_seconds: u64,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts the database URL.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("bind_address", &self.bind_address)
            .field("connection", &self.connection)
            .field("scheduler", &self.scheduler)
            .field("drain_seconds", &self.drain_seconds)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Invalid keepalive configuration: {0}")]
    InvalidKeepalive(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .map(|v| SecretString::from(v.clone()));

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let connection = ConnectionConfig {
            mailbox_capacity: parse_positive(
                vars,
                "HUB_MAILBOX_CAPACITY",
                DEFAULT_MAILBOX_CAPACITY as u64,
            )? as usize,
            ping_interval: seconds(vars, "WS_PING_INTERVAL_SECONDS", DEFAULT_PING_INTERVAL_SECONDS)?,
            read_timeout: seconds(vars, "WS_READ_TIMEOUT_SECONDS", DEFAULT_READ_TIMEOUT_SECONDS)?,
            write_timeout: seconds(
                vars,
                "WS_WRITE_TIMEOUT_SECONDS",
                DEFAULT_WRITE_TIMEOUT_SECONDS,
            )?,
            max_message_bytes: parse_positive(
                vars,
                "WS_MAX_MESSAGE_BYTES",
                DEFAULT_MAX_MESSAGE_BYTES as u64,
            )? as usize,
        };

        if connection.ping_interval >= connection.read_timeout {
            return Err(ConfigError::InvalidKeepalive(format!(
                "WS_PING_INTERVAL_SECONDS ({}) must be less than WS_READ_TIMEOUT_SECONDS ({})",
                connection.ping_interval.as_secs(),
                connection.read_timeout.as_secs()
            )));
        }

        let scheduler = SchedulerConfig {
            open_interval: seconds(vars, "QS_OPEN_INTERVAL_SECONDS", DEFAULT_OPEN_INTERVAL_SECONDS)?,
            close_interval: seconds(
                vars,
                "QS_CLOSE_INTERVAL_SECONDS",
                DEFAULT_CLOSE_INTERVAL_SECONDS,
            )?,
            snapshot_interval: seconds(
                vars,
                "QS_SNAPSHOT_INTERVAL_SECONDS",
                DEFAULT_SNAPSHOT_INTERVAL_SECONDS,
            )?,
            purge_interval: seconds(
                vars,
                "QS_PURGE_INTERVAL_SECONDS",
                DEFAULT_PURGE_INTERVAL_SECONDS,
            )?,
            open_window: Duration::from_secs(
                parse_positive(vars, "QS_OPEN_WINDOW_MINUTES", DEFAULT_OPEN_WINDOW_MINUTES)?
                    .saturating_mul(60),
            ),
            schedule_retention: Duration::from_secs(
                parse_non_negative(
                    vars,
                    "QS_SCHEDULE_RETENTION_HOURS",
                    DEFAULT_SCHEDULE_RETENTION_HOURS,
                )?
                .saturating_mul(3600),
            ),
            queue_retention: Duration::from_secs(
                parse_non_negative(
                    vars,
                    "QS_QUEUE_RETENTION_HOURS",
                    DEFAULT_QUEUE_RETENTION_HOURS,
                )?
                .saturating_mul(3600),
            ),
            job_timeout: seconds(vars, "QS_JOB_TIMEOUT_SECONDS", DEFAULT_JOB_TIMEOUT_SECONDS)?,
        };

        let drain_seconds = parse_non_negative(vars, "QS_DRAIN_SECONDS", 0)?;

        Ok(Config {
            database_url,
            bind_address,
            connection,
            scheduler,
            drain_seconds,
            observability: ObservabilityConfig::from_vars(vars),
        })
    }
}

fn parse_non_negative(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match vars.get(name) {
        Some(value_str) => value_str
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue {
                name: name.to_string(),
                reason: format!("must be a non-negative integer, got '{}': {}", value_str, e),
            }),
        None => Ok(default),
    }
}

fn parse_positive(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let value = parse_non_negative(vars, name, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(value)
}

fn seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    parse_positive(vars, name, default).map(Duration::from_secs)
}
