//! Redacted wrappers for credentials carried in configuration.
//!
//! Connection strings embed passwords, so they are held as [`SecretString`]
//! and only exposed at the point where a pool is built. `Debug` output of any
//! struct holding one shows `[REDACTED]` instead of the value.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let url = SecretString::from("postgresql://queue:pw@localhost/queues");
//! assert!(!format!("{url:?}").contains("pw"));
//! assert!(url.expose_secret().starts_with("postgresql://"));
//! ```

pub use secrecy::{ExposeSecret, SecretString};
