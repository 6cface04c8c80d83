//! Custom error types for the bridge.
//!
//! This module defines the primary error type, `BridgeError`, shared by every layer of the
//! bridge. Using the `thiserror` crate, it gives one consistent way to report failures, from
//! configuration loading and socket I/O up to instrument-level range and parse problems.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: loading (figment) and semantic validation of the
//!   configuration. Fatal at start-up.
//! - **`Connection`**: the instrument endpoint could not be reached. Logged, then the process
//!   exits; there is no retry.
//! - **`InvalidRange`** / **`InvalidChannel`**: a setter or channel query was given a value the
//!   instrument does not accept. Returned to the caller before any transport traffic.
//! - **`Parse`**: the instrument replied with something that does not have the expected shape.
//! - **`Io`**, **`Timeout`**, **`NotOpen`**, **`Http`**: transport-level failures.
//! - **`TopicType`**: a message of the wrong primitive type was sent to a topic.
//! - **`Serialization`**: a relay line could not be encoded.
//!
//! By using `#[from]`, `BridgeError` can be created from the underlying error types with `?`.

use std::time::Duration;
use thiserror::Error;

use crate::bus::MessageKind;

/// Convenience alias for results using the bridge error type.
pub type AppResult<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to connect to {endpoint}: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport to {0} is not open")]
    NotOpen(String),

    #[error("Timed out after {timeout:?} waiting for {what}")]
    Timeout { timeout: Duration, what: String },

    #[error("{quantity} {value} is out of range [{min}, {max}]")]
    InvalidRange {
        quantity: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Channel {channel} does not exist (valid: 1-{count})")]
    InvalidChannel { channel: usize, count: usize },

    #[error("Failed to parse reply {reply:?}: {reason}")]
    Parse { reply: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Topic '{topic}' carries {expected:?} messages, got {actual:?}")]
    TopicType {
        topic: String,
        expected: MessageKind,
        actual: MessageKind,
    },

    #[error("Task '{0}' failed: {1}")]
    Task(String, String),
}

impl BridgeError {
    /// Builds a [`BridgeError::Parse`] for a reply that did not have the expected shape.
    pub fn parse(reply: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::Parse {
            reply: reply.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that mean the instrument could not be reached at all.
    pub fn is_connection(&self) -> bool {
        matches!(self, BridgeError::Connection { .. } | BridgeError::Http(_))
    }
}
