//! Error types for the notifications domain.

use amqp_worker::{BrokerError, ProcessingError};
use thiserror::Error;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur in the notifications domain.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Broker-side failure (connection, topology, publish).
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    /// Email provider error.
    #[error("Email provider error: {0}")]
    ProviderError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl NotificationError {
    /// Whether retrying later could succeed (the broker connection is healing).
    pub fn is_connection_error(&self) -> bool {
        matches!(self, NotificationError::Broker(e) if e.is_connection_error())
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        NotificationError::Serialization(err.to_string())
    }
}

impl From<core_config::ConfigError> for NotificationError {
    fn from(err: core_config::ConfigError) -> Self {
        NotificationError::ConfigError(err.to_string())
    }
}

/// A failed downstream action is a processing failure; the dispatcher dead-letters it.
impl From<NotificationError> for ProcessingError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::Serialization(e) => ProcessingError::Decode(e),
            other => ProcessingError::Handler(other.to_string()),
        }
    }
}
