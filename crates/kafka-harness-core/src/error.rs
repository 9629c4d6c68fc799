//! Domain error types for the Kafka test harness.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.
//! Infrastructure failures (broker startup, settings, client acquisition and
//! release) are kept apart from whatever the caller's logic returns.

use std::time::Duration;

use thiserror::Error;

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A timeout or interval was configured as zero.
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    /// Topics need at least one partition.
    #[error("default_partitions must be at least 1, got {0}")]
    InvalidPartitionCount(i32),

    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// The embedded broker never produced a usable address set.
#[derive(Error, Debug)]
pub enum BrokerStartupError {
    /// A broker handle needs at least one address.
    #[error("broker reported no addresses")]
    NoAddresses,

    /// The broker did not answer a metadata request inside the startup window.
    #[error("broker not ready after {waited:?}")]
    NotReady { waited: Duration },

    /// The container runtime failed to start or inspect the broker.
    #[error("broker container error: {0}")]
    Container(String),

    /// Failed to reserve a local port for an in-process broker.
    #[error("failed to bind broker address: {0}")]
    Bind(#[from] std::io::Error),
}

/// Caller-supplied client identity was rejected before any network I/O.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// Consumer group id was empty or whitespace.
    #[error("consumer group id must not be empty")]
    EmptyGroupId,

    /// Client id was empty or whitespace.
    #[error("client id must not be empty")]
    EmptyClientId,
}

/// Failures reported by the messaging client layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The broker refused or dropped the connection.
    #[error("connection to {address} failed: {message}")]
    Connection { address: String, message: String },

    /// Error surfaced by the Kafka client library.
    #[error("kafka error: {0}")]
    Kafka(String),

    /// Producing a record was not acknowledged.
    #[error("send to {topic} failed: {message}")]
    Send { topic: String, message: String },

    /// A partition does not exist on the broker.
    #[error("partition {partition} does not exist for topic {topic}")]
    UnknownPartition { topic: String, partition: i32 },

    /// Key or value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The client was used after it was released or the broker stopped.
    #[error("client closed")]
    Closed,

    /// The blocking executor failed to run a job to completion.
    #[error("blocking task failed: {0}")]
    Blocking(String),
}

impl From<rdkafka::error::KafkaError> for ClientError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        Self::Kafka(err.to_string())
    }
}

/// Outcome of a scoped client operation that did not simply succeed.
///
/// `T` and `E` are the success and error types of the caller's logic. A
/// release failure carries the logic outcome so a result that was already
/// produced is never discarded.
#[derive(Error, Debug)]
pub enum ScopeError<T, E> {
    /// Settings were rejected; nothing was acquired.
    #[error("invalid settings: {0}")]
    InvalidSettings(#[from] SettingsError),

    /// The client could not be acquired; logic never ran.
    #[error("client acquisition failed: {0}")]
    Acquisition(ClientError),

    /// Logic ran and failed; the client was released cleanly.
    #[error("scoped logic failed")]
    Logic(E),

    /// Logic ran but releasing the client failed afterwards.
    #[error("client release failed: {source}")]
    Release {
        source: ClientError,
        outcome: Result<T, E>,
    },
}

impl<T, E> ScopeError<T, E> {
    /// The logic failure, if this error wraps one.
    pub fn logic_error(&self) -> Option<&E> {
        match self {
            Self::Logic(e) | Self::Release { outcome: Err(e), .. } => Some(e),
            _ => None,
        }
    }

    /// Whether the caller's logic never ran.
    #[must_use]
    pub fn is_before_logic(&self) -> bool {
        matches!(self, Self::InvalidSettings(_) | Self::Acquisition(_))
    }
}

/// Result type alias for client library operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Result type alias for settings derivation.
pub type SettingsResult<T> = std::result::Result<T, SettingsError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for broker startup.
pub type StartupResult<T> = std::result::Result<T, BrokerStartupError>;

/// Result type alias for scoped client operations.
pub type ScopeResult<T, E> = std::result::Result<T, ScopeError<T, E>>;
