//! Transport seam between the client and a concrete broker.
//!
//! This module provides:
//! - `Connector` for opening a session (one connection + one logical channel)
//! - `Session` for the channel operations the client needs
//! - Declaration records (`ExchangeDecl`, `QueueDecl`, `BindingDecl`)
//! - Message types (`Envelope`, `InboundMessage`, `Delivery`, `DeliveryTag`)
//!
//! `amqp::AmqpConnector` speaks AMQP 0-9-1 through lapin; `memory::InMemoryBroker`
//! implements the same contract in-process for tests and local runs.

use crate::error::{BrokerError, ProcessingError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};

/// Content type stamped on JSON payloads.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Exchange routing types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Direct,
    Topic,
    Fanout,
    Headers,
}

/// Exchange record: `(name, type, durable)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDecl {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

impl ExchangeDecl {
    pub fn new(name: impl Into<String>, kind: ExchangeKind, durable: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            durable,
        }
    }
}

/// Queue flags and `x-` arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    /// `x-dead-letter-exchange`
    pub dead_letter_exchange: Option<String>,
    /// `x-dead-letter-routing-key`
    pub dead_letter_routing_key: Option<String>,
    /// `x-message-ttl`
    pub message_ttl: Option<Duration>,
    /// `x-max-length`
    pub max_length: Option<u32>,
}

impl QueueOptions {
    /// Durable, non-exclusive, no arguments
    pub fn durable() -> Self {
        Self::default()
    }

    /// Non-durable queue
    pub fn transient() -> Self {
        Self {
            durable: false,
            ..Self::default()
        }
    }

    /// Route rejected messages to `exchange` with `routing_key`
    pub fn with_dead_letter(
        mut self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self.dead_letter_routing_key = Some(routing_key.into());
        self
    }

    /// Expire messages after `ttl`
    pub fn with_message_ttl(mut self, ttl: Duration) -> Self {
        self.message_ttl = Some(ttl);
        self
    }

    /// Cap queue depth
    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Apply caller overrides on top of these options; set fields win.
    pub fn merged(mut self, overrides: &QueueOverrides) -> Self {
        if let Some(durable) = overrides.durable {
            self.durable = durable;
        }
        if let Some(exclusive) = overrides.exclusive {
            self.exclusive = exclusive;
        }
        if let Some(auto_delete) = overrides.auto_delete {
            self.auto_delete = auto_delete;
        }
        if let Some(exchange) = &overrides.dead_letter_exchange {
            self.dead_letter_exchange = Some(exchange.clone());
        }
        if let Some(key) = &overrides.dead_letter_routing_key {
            self.dead_letter_routing_key = Some(key.clone());
        }
        if let Some(ttl) = overrides.message_ttl {
            self.message_ttl = Some(ttl);
        }
        if let Some(max_length) = overrides.max_length {
            self.max_length = Some(max_length);
        }
        self
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
            dead_letter_exchange: None,
            dead_letter_routing_key: None,
            message_ttl: None,
            max_length: None,
        }
    }
}

/// Caller-supplied queue options merged over computed defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOverrides {
    pub durable: Option<bool>,
    pub exclusive: Option<bool>,
    pub auto_delete: Option<bool>,
    pub dead_letter_exchange: Option<String>,
    pub dead_letter_routing_key: Option<String>,
    pub message_ttl: Option<Duration>,
    pub max_length: Option<u32>,
}

/// Queue record: name plus options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDecl {
    pub name: String,
    pub options: QueueOptions,
}

impl QueueDecl {
    pub fn new(name: impl Into<String>, options: QueueOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

/// Queue-to-exchange binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingDecl {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

impl BindingDecl {
    pub fn new(
        queue: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

/// Message envelope: payload bytes plus the properties that travel with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub payload: Vec<u8>,
    pub content_type: Option<String>,
    /// Delivery mode 2 (survives broker restart on durable queues)
    pub persistent: bool,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Persistent envelope with no metadata
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            content_type: None,
            persistent: true,
            message_id: None,
            correlation_id: None,
            timestamp: None,
        }
    }
}

/// A message as handed over by a session, tagged with the raw channel tag.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub envelope: Envelope,
}

/// Handle correlating an ack/nack with a received message.
///
/// The epoch identifies the session that produced the tag; once the client
/// reconnects, tags from older epochs are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag {
    epoch: u64,
    value: u64,
}

impl DeliveryTag {
    pub(crate) fn new(epoch: u64, value: u64) -> Self {
        Self { epoch, value }
    }

    /// Session epoch this tag belongs to
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Channel-level tag
    pub fn value(&self) -> u64 {
        self.value
    }
}

impl std::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.epoch, self.value)
    }
}

/// A delivered message as seen by handlers.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub queue: String,
    pub redelivered: bool,
    pub envelope: Envelope,
}

impl Delivery {
    pub(crate) fn from_inbound(epoch: u64, queue: &str, message: InboundMessage) -> Self {
        Self {
            tag: DeliveryTag::new(epoch, message.delivery_tag),
            queue: queue.to_string(),
            redelivered: message.redelivered,
            envelope: message.envelope,
        }
    }

    /// Raw payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.envelope.payload
    }

    /// Message id, if the publisher set one
    pub fn message_id(&self) -> Option<&str> {
        self.envelope.message_id.as_deref()
    }

    /// Decode the payload as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ProcessingError> {
        serde_json::from_slice(&self.envelope.payload).map_err(ProcessingError::from)
    }
}

/// Stream of messages for one consumer on one session.
///
/// The stream ends when the consumer is cancelled or the session dies.
pub type DeliveryStream = BoxStream<'static, Result<InboundMessage, BrokerError>>;

/// Opens sessions against a broker.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection and a channel on it.
    async fn connect(&self) -> Result<Arc<dyn Session>, BrokerError>;

    /// Connector name for logging.
    fn name(&self) -> &'static str;
}

/// One connection plus one logical channel.
///
/// Implementations are not expected to tolerate interleaved operations from
/// independent callers; the client serializes access.
#[async_trait]
pub trait Session: Send + Sync {
    async fn declare_exchange(&self, decl: &ExchangeDecl) -> Result<(), BrokerError>;

    async fn declare_queue(&self, decl: &QueueDecl) -> Result<(), BrokerError>;

    async fn bind_queue(&self, binding: &BindingDecl) -> Result<(), BrokerError>;

    /// Per-consumer prefetch applied to consumers started after this call.
    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError>;

    /// Send to `queue` through the default exchange.
    async fn publish(&self, queue: &str, envelope: &Envelope) -> Result<(), BrokerError>;

    /// Start a manual-ack consumer.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError>;

    /// Stop a consumer; unacked deliveries stay outstanding until acked or the session ends.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    /// Close the channel, then the connection.
    async fn close(&self) -> Result<(), BrokerError>;

    /// Resolves with a reason once the connection or channel closes or errors.
    async fn closed(&self) -> String;

    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_exchange_kind_strings() {
        assert_eq!(ExchangeKind::Direct.to_string(), "direct");
        assert_eq!(ExchangeKind::from_str("FANOUT").unwrap(), ExchangeKind::Fanout);
        assert!(ExchangeKind::from_str("x-delayed").is_err());
    }

    #[test]
    fn test_queue_options_merge_prefers_overrides() {
        let base = QueueOptions::durable().with_dead_letter("Q_DLX", "Q_DLQ");
        let overrides = QueueOverrides {
            max_length: Some(10),
            dead_letter_routing_key: Some("custom".to_string()),
            ..QueueOverrides::default()
        };

        let merged = base.merged(&overrides);
        assert!(merged.durable);
        assert_eq!(merged.dead_letter_exchange.as_deref(), Some("Q_DLX"));
        assert_eq!(merged.dead_letter_routing_key.as_deref(), Some("custom"));
        assert_eq!(merged.max_length, Some(10));
    }

    #[test]
    fn test_empty_overrides_keep_base() {
        let base = QueueOptions::durable().with_message_ttl(Duration::from_secs(1));
        assert_eq!(base.clone().merged(&QueueOverrides::default()), base);
    }

    #[test]
    fn test_delivery_json_decode() {
        let message = InboundMessage {
            delivery_tag: 7,
            redelivered: false,
            envelope: Envelope::new(br#"{"n":1}"#.to_vec()),
        };
        let delivery = Delivery::from_inbound(3, "q", message);

        #[derive(Deserialize)]
        struct N {
            n: u32,
        }

        assert_eq!(delivery.tag.epoch(), 3);
        assert_eq!(delivery.tag.value(), 7);
        assert_eq!(delivery.tag.to_string(), "3:7");
        assert_eq!(delivery.json::<N>().unwrap().n, 1);
        assert!(matches!(delivery.json::<Vec<u8>>(), Err(ProcessingError::Decode(_))));
    }
}
