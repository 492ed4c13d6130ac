//! AMQP Worker Framework
//!
//! A resilient message-broker client for request/processing decoupling over
//! RabbitMQ.
//!
//! ## Features
//!
//! - **Connection manager**: `BrokerClient` reconnects at a fixed interval and
//!   re-declares topology on every new session
//! - **Topology**: idempotent exchange/queue declarations and `<queue>_DLX` /
//!   `<queue>_DLQ` dead-letter pairs
//! - **Publisher**: persistent JSON messages, publish errors surfaced to the caller
//! - **Consumer**: handler-driven ack/nack, prefetch-bounded concurrency,
//!   failures dead-lettered
//! - **Transports**: lapin (`amqp`) and an in-process broker (`memory`) for tests
//! - **Prometheus metrics** and **health endpoints**
//!
//! ## Example
//!
//! ```ignore
//! use amqp_worker::{AmqpConnector, BrokerClient, ClientConfig, ConsumeOptions, QueueOverrides};
//!
//! let client = BrokerClient::new(AmqpConnector::new(url), ClientConfig::new());
//! client.init().await?;
//!
//! client.topology().setup_dead_letter("orders", QueueOverrides::default()).await?;
//! let handle = client.consumer().consume("orders", OrderHandler, ConsumeOptions::new()).await?;
//!
//! // ...
//! client.close().await?;
//! ```

pub mod amqp;
mod config;
mod connection;
mod consumer;
mod error;
mod health;
pub mod memory;
pub mod metrics;
mod publisher;
mod topology;
pub mod transport;

// Re-export main types
pub use amqp::AmqpConnector;
pub use config::{ClientConfig, DeadLetterPolicy, ReconnectPolicy};
pub use connection::{BrokerClient, ConnectionState};
pub use consumer::{ConsumeOptions, Consumer, ConsumerHandle, Disposition, MessageHandler};
pub use error::{BrokerError, ProcessingError};
pub use health::{health_router, HealthState};
pub use memory::InMemoryBroker;
pub use metrics::{init_metrics, QueueMetrics};
pub use publisher::{PublishOptions, Publisher};
pub use topology::{dead_letter_names, DeadLetterNames, Topology};
pub use transport::{
    Connector, Delivery, DeliveryTag, Envelope, ExchangeKind, QueueOptions, QueueOverrides,
    Session, JSON_CONTENT_TYPE,
};
