//! Broker error types and error categorization
//!
//! Errors are split by who has to deal with them:
//! - **Connection**: transport faults, recovered by the reconnect loop, never fatal
//! - **TopologyConflict**: declared arguments disagree with what exists, surfaced to the declarer
//! - **Publish**: the broker could not accept a message, surfaced to the publisher
//! - **Processing**: a handler failed, converted to nack-without-requeue by the dispatcher
//! - **ShutdownTimeout**: graceful close exceeded its bound, escalated by the binary

use std::time::Duration;
use thiserror::Error;

/// Broker client errors
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Transport-level failure while connecting or talking to the broker
    #[error("Connection error: {0}")]
    Connection(String),

    /// The logical channel failed or was closed underneath an operation
    #[error("Channel error: {0}")]
    Channel(String),

    /// An exchange or queue already exists with different arguments
    #[error("Topology conflict on '{name}': {reason}")]
    TopologyConflict { name: String, reason: String },

    /// The broker did not accept a message for delivery
    #[error("Publish to '{queue}' failed: {reason}")]
    Publish { queue: String, reason: String },

    /// Payload could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The client has been closed; no further operations are possible
    #[error("Broker client is closed")]
    Closed,

    /// The reconnect policy carries an attempt cap and it was reached
    #[error("Gave up connecting to broker after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// Graceful shutdown did not finish within its bound
    #[error("Broker shutdown exceeded {0:?}")]
    ShutdownTimeout(Duration),
}

impl BrokerError {
    /// Create a topology conflict error
    pub fn conflict(name: impl Into<String>, reason: impl Into<String>) -> Self {
        BrokerError::TopologyConflict {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a publish error
    pub fn publish(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        BrokerError::Publish {
            queue: queue.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure belongs to the transport and will heal on reconnect.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, BrokerError::Connection(_) | BrokerError::Channel(_))
    }

    /// Whether the failure is terminal for this client instance.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BrokerError::Closed | BrokerError::RetriesExhausted { .. } | BrokerError::ShutdownTimeout(_)
        )
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Serialization(err.to_string())
    }
}

/// Failure raised while handling a delivered message.
///
/// Every variant leads to the same outcome (nack without requeue, so the
/// message is dead-lettered); the variants exist for logs and metrics.
#[derive(Error, Debug)]
pub enum ProcessingError {
    /// Payload could not be decoded into the handler's input type
    #[error("Failed to decode message: {0}")]
    Decode(String),

    /// The handler or a downstream action it invoked failed
    #[error("Handler failed: {0}")]
    Handler(String),

    /// The handler panicked
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl ProcessingError {
    /// Create a handler failure
    pub fn handler(message: impl Into<String>) -> Self {
        ProcessingError::Handler(message.into())
    }

    /// Create a decode failure
    pub fn decode(message: impl Into<String>) -> Self {
        ProcessingError::Decode(message.into())
    }

    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            ProcessingError::Decode(_) => "decode",
            ProcessingError::Handler(_) => "handler",
            ProcessingError::Panicked(_) => "panic",
        }
    }
}

impl From<serde_json::Error> for ProcessingError {
    fn from(err: serde_json::Error) -> Self {
        ProcessingError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_are_not_terminal() {
        let err = BrokerError::Connection("refused".into());
        assert!(err.is_connection_error());
        assert!(!err.is_terminal());

        let err = BrokerError::Channel("closed".into());
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_terminal_errors() {
        assert!(BrokerError::Closed.is_terminal());
        assert!(BrokerError::RetriesExhausted { attempts: 3 }.is_terminal());
        assert!(BrokerError::ShutdownTimeout(Duration::from_secs(1)).is_terminal());
        assert!(!BrokerError::conflict("q", "durable mismatch").is_terminal());
    }

    #[test]
    fn test_error_messages_name_the_resource() {
        let err = BrokerError::conflict("orders", "durable mismatch");
        assert!(err.to_string().contains("orders"));

        let err = BrokerError::publish("orders", "buffer full");
        assert!(err.to_string().contains("orders"));
        assert!(err.to_string().contains("buffer full"));
    }

    #[test]
    fn test_processing_error_from_json() {
        let err: ProcessingError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.label(), "decode");
    }
}
