//! Message publisher
//!
//! Sends through the default exchange straight to a queue. Messages are
//! persistent JSON by default. A send the broker does not accept comes back
//! as `BrokerError::Publish`; there is no retry at this layer.

use crate::connection::BrokerClient;
use crate::error::BrokerError;
use crate::metrics::QueueMetrics;
use crate::transport::{Envelope, JSON_CONTENT_TYPE};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

/// Per-message publish options. Set fields override the defaults.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub message_id: Option<String>,
    /// Defaults to `application/json`
    pub content_type: Option<String>,
    /// Defaults to true (delivery mode 2)
    pub persistent: bool,
    /// Defaults to the time of publishing
    pub timestamp: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            message_id: None,
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            persistent: true,
            timestamp: None,
            correlation_id: None,
        }
    }
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Send without delivery mode 2
    pub fn transient(mut self) -> Self {
        self.persistent = false;
        self
    }

    fn into_envelope(self, payload: Vec<u8>) -> Envelope {
        Envelope {
            payload,
            content_type: self.content_type,
            persistent: self.persistent,
            message_id: self.message_id,
            correlation_id: self.correlation_id,
            timestamp: Some(self.timestamp.unwrap_or_else(Utc::now)),
        }
    }
}

/// Publishes to queues over the client's channel.
#[derive(Debug, Clone)]
pub struct Publisher {
    client: BrokerClient,
}

impl Publisher {
    pub fn new(client: BrokerClient) -> Self {
        Self { client }
    }

    /// Serialize `payload` as JSON and publish it to `queue`.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        queue: &str,
        payload: &T,
        options: PublishOptions,
    ) -> Result<(), BrokerError> {
        let bytes = serde_json::to_vec(payload)?;
        self.publish_bytes(queue, bytes, options).await
    }

    /// Publish raw bytes to `queue`, waiting for a connection if necessary.
    pub async fn publish_bytes(
        &self,
        queue: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), BrokerError> {
        let metrics = QueueMetrics::new(queue, "publisher");
        let envelope = options.into_envelope(payload);
        let active = self.client.session().await?;

        let result = {
            let _channel = self.client.lock_channel().await;
            active.session.publish(queue, &envelope).await
        };

        match result {
            Ok(()) => {
                metrics.published();
                debug!(
                    queue = %queue,
                    message_id = envelope.message_id.as_deref().unwrap_or(""),
                    bytes = envelope.payload.len(),
                    "Message published"
                );
                Ok(())
            }
            Err(e) => {
                metrics.publish_failed();
                warn!(
                    queue = %queue,
                    message_id = envelope.message_id.as_deref().unwrap_or(""),
                    error = %e,
                    "Publish failed"
                );
                match e {
                    BrokerError::Publish { .. } => Err(e),
                    other => Err(BrokerError::publish(queue, other.to_string())),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, ReconnectPolicy};
    use crate::memory::InMemoryBroker;
    use crate::transport::QueueOptions;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Order {
        id: u32,
        item: String,
    }

    async fn setup() -> (InMemoryBroker, BrokerClient) {
        let broker = InMemoryBroker::new();
        let client = BrokerClient::new(
            broker.clone(),
            ClientConfig::new().with_reconnect(ReconnectPolicy::fixed(Duration::from_secs(1))),
        );
        client
            .topology()
            .declare_queue("orders", QueueOptions::durable())
            .await
            .unwrap();
        (broker, client)
    }

    #[tokio::test]
    async fn test_publish_defaults_to_persistent_json() {
        let (broker, client) = setup().await;
        let order = Order {
            id: 7,
            item: "book".into(),
        };

        client
            .publisher()
            .publish("orders", &order, PublishOptions::new().with_message_id("order-7"))
            .await
            .unwrap();

        let messages = broker.messages("orders");
        assert_eq!(messages.len(), 1);
        let envelope = &messages[0];
        assert!(envelope.persistent);
        assert_eq!(envelope.content_type.as_deref(), Some(JSON_CONTENT_TYPE));
        assert_eq!(envelope.message_id.as_deref(), Some("order-7"));
        assert!(envelope.timestamp.is_some());
        assert_eq!(serde_json::from_slice::<Order>(&envelope.payload).unwrap(), order);
    }

    #[tokio::test]
    async fn test_options_override_defaults() {
        let (broker, client) = setup().await;

        client
            .publisher()
            .publish_bytes(
                "orders",
                b"plain".to_vec(),
                PublishOptions::new()
                    .with_content_type("text/plain")
                    .with_correlation_id("c-1")
                    .transient(),
            )
            .await
            .unwrap();

        let envelope = &broker.messages("orders")[0];
        assert!(!envelope.persistent);
        assert_eq!(envelope.content_type.as_deref(), Some("text/plain"));
        assert_eq!(envelope.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(envelope.payload, b"plain".to_vec());
    }

    #[tokio::test]
    async fn test_rejected_publish_is_surfaced_not_retried() {
        let (broker, client) = setup().await;
        broker.reject_publishes(1);

        let err = client
            .publisher()
            .publish_bytes("orders", b"x".to_vec(), PublishOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Publish { ref queue, .. } if queue == "orders"));
        assert_eq!(broker.queue_depth("orders"), 0);

        client
            .publisher()
            .publish_bytes("orders", b"y".to_vec(), PublishOptions::new())
            .await
            .unwrap();
        assert_eq!(broker.queue_depth("orders"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_waits_for_connection() {
        let (broker, client) = setup().await;
        broker.set_offline(true);
        client
            .subscribe_state()
            .wait_for(|s| !matches!(s, crate::ConnectionState::Connected))
            .await
            .unwrap();

        let publisher = client.publisher();
        let pending = tokio::spawn(async move {
            publisher
                .publish_bytes("orders", b"later".to_vec(), PublishOptions::new())
                .await
        });

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!pending.is_finished());

        broker.set_offline(false);
        pending.await.unwrap().unwrap();
        assert_eq!(broker.queue_depth("orders"), 1);
    }
}
