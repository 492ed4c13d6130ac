//! Queue topology provisioning
//!
//! Declarations go through a client-side registry:
//! - identical redeclaration returns immediately without a broker round trip
//! - conflicting redeclaration fails with `TopologyConflict` before reaching the broker
//! - recorded declarations are replayed on every new session, in order
//!
//! The broker's own `PRECONDITION_FAILED` is mapped to `TopologyConflict` by
//! the transport, covering topology declared by other processes.

use crate::config::DeadLetterPolicy;
use crate::connection::BrokerClient;
use crate::error::BrokerError;
use crate::transport::{
    BindingDecl, ExchangeDecl, ExchangeKind, QueueDecl, QueueOptions, QueueOverrides, Session,
};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// Names derived for a queue's dead-letter pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterNames {
    /// `<queue>_DLX`, a durable direct exchange
    pub exchange: String,
    /// `<queue>_DLQ`, also the binding routing key
    pub queue: String,
}

impl DeadLetterNames {
    /// Routing key binding the DLQ to the DLX
    pub fn routing_key(&self) -> &str {
        &self.queue
    }
}

/// Derive the dead-letter exchange and queue names for `queue`.
pub fn dead_letter_names(queue: &str) -> DeadLetterNames {
    DeadLetterNames {
        exchange: format!("{}_DLX", queue),
        queue: format!("{}_DLQ", queue),
    }
}

#[derive(Debug, Clone)]
pub(crate) enum TopologyRecord {
    Exchange(ExchangeDecl),
    Queue(QueueDecl),
    Binding(BindingDecl),
}

impl TopologyRecord {
    pub(crate) async fn apply(&self, session: &dyn Session) -> Result<(), BrokerError> {
        match self {
            TopologyRecord::Exchange(decl) => session.declare_exchange(decl).await,
            TopologyRecord::Queue(decl) => session.declare_queue(decl).await,
            TopologyRecord::Binding(binding) => session.bind_queue(binding).await,
        }
    }
}

impl fmt::Display for TopologyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyRecord::Exchange(decl) => write!(f, "exchange '{}'", decl.name),
            TopologyRecord::Queue(decl) => write!(f, "queue '{}'", decl.name),
            TopologyRecord::Binding(b) => {
                write!(f, "binding '{}' -> '{}' ({})", b.queue, b.exchange, b.routing_key)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Registration {
    /// Not seen before; recorded and must be sent to the broker
    New,
    /// Identical record already present
    Known,
}

/// Declarations made through this client, in declaration order.
#[derive(Debug, Default)]
pub(crate) struct TopologyRegistry {
    records: Vec<TopologyRecord>,
    exchanges: HashMap<String, ExchangeDecl>,
    queues: HashMap<String, QueueDecl>,
}

impl TopologyRegistry {
    pub(crate) fn register_exchange(
        &mut self,
        decl: &ExchangeDecl,
    ) -> Result<Registration, BrokerError> {
        match self.exchanges.get(&decl.name) {
            Some(existing) if existing == decl => Ok(Registration::Known),
            Some(existing) => Err(BrokerError::conflict(
                &decl.name,
                format!(
                    "exchange already declared as {}/durable={}, requested {}/durable={}",
                    existing.kind, existing.durable, decl.kind, decl.durable
                ),
            )),
            None => {
                self.exchanges.insert(decl.name.clone(), decl.clone());
                self.records.push(TopologyRecord::Exchange(decl.clone()));
                Ok(Registration::New)
            }
        }
    }

    pub(crate) fn register_queue(&mut self, decl: &QueueDecl) -> Result<Registration, BrokerError> {
        match self.queues.get(&decl.name) {
            Some(existing) if existing == decl => Ok(Registration::Known),
            Some(existing) => Err(BrokerError::conflict(
                &decl.name,
                format!(
                    "queue already declared with {:?}, requested {:?}",
                    existing.options, decl.options
                ),
            )),
            None => {
                self.queues.insert(decl.name.clone(), decl.clone());
                self.records.push(TopologyRecord::Queue(decl.clone()));
                Ok(Registration::New)
            }
        }
    }

    pub(crate) fn register_binding(&mut self, binding: &BindingDecl) -> Registration {
        let known = self
            .records
            .iter()
            .any(|r| matches!(r, TopologyRecord::Binding(b) if b == binding));
        if known {
            return Registration::Known;
        }
        self.records.push(TopologyRecord::Binding(binding.clone()));
        Registration::New
    }

    /// Drop a record the broker refused.
    pub(crate) fn forget(&mut self, name: &str) {
        self.exchanges.remove(name);
        self.queues.remove(name);
        self.records.retain(|r| match r {
            TopologyRecord::Exchange(d) => d.name != name,
            TopologyRecord::Queue(d) => d.name != name,
            TopologyRecord::Binding(_) => true,
        });
    }

    pub(crate) fn forget_binding(&mut self, binding: &BindingDecl) {
        self.records
            .retain(|r| !matches!(r, TopologyRecord::Binding(b) if b == binding));
    }

    pub(crate) fn snapshot(&self) -> Vec<TopologyRecord> {
        self.records.clone()
    }
}

/// Declares exchanges, queues and dead-letter pairs.
#[derive(Debug, Clone)]
pub struct Topology {
    client: BrokerClient,
}

impl Topology {
    pub fn new(client: BrokerClient) -> Self {
        Self { client }
    }

    /// Declare an exchange; a no-op when already declared identically.
    pub async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        let decl = ExchangeDecl::new(name, kind, durable);
        if self.client.registry().register_exchange(&decl)? == Registration::Known {
            debug!(exchange = %name, "Exchange already declared");
            return Ok(());
        }

        let record = TopologyRecord::Exchange(decl);
        self.send(&record).await.inspect_err(|e| {
            if matches!(e, BrokerError::TopologyConflict { .. }) {
                self.client.registry().forget(name);
            }
        })
    }

    /// Declare a queue; a no-op when already declared identically.
    pub async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<(), BrokerError> {
        let decl = QueueDecl::new(name, options);
        if self.client.registry().register_queue(&decl)? == Registration::Known {
            debug!(queue = %name, "Queue already declared");
            return Ok(());
        }

        let record = TopologyRecord::Queue(decl);
        self.send(&record).await.inspect_err(|e| {
            if matches!(e, BrokerError::TopologyConflict { .. }) {
                self.client.registry().forget(name);
            }
        })
    }

    /// Bind `queue` to `exchange` with `routing_key`.
    pub async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        let binding = BindingDecl::new(queue, exchange, routing_key);
        if self.client.registry().register_binding(&binding) == Registration::Known {
            return Ok(());
        }

        let record = TopologyRecord::Binding(binding.clone());
        self.send(&record).await.inspect_err(|e| {
            if !e.is_connection_error() {
                self.client.registry().forget_binding(&binding);
            }
        })
    }

    /// Declare `<queue>_DLX` (direct, durable) and `<queue>_DLQ` (durable), bind
    /// them with routing key `<queue>_DLQ`, then declare `queue` itself pointing
    /// at that pair. `overrides` are merged over the computed queue options.
    ///
    /// Under [`DeadLetterPolicy::Expire`] the DLQ also gets a message TTL.
    pub async fn setup_dead_letter(
        &self,
        queue: &str,
        overrides: QueueOverrides,
    ) -> Result<DeadLetterNames, BrokerError> {
        let names = dead_letter_names(queue);

        self.declare_exchange(&names.exchange, ExchangeKind::Direct, true)
            .await?;

        let dlq_options = match self.client.config().dead_letter {
            DeadLetterPolicy::Retain => QueueOptions::durable(),
            DeadLetterPolicy::Expire { ttl } => QueueOptions::durable().with_message_ttl(ttl),
        };
        self.declare_queue(&names.queue, dlq_options).await?;
        self.bind_queue(&names.queue, &names.exchange, names.routing_key())
            .await?;

        let main_options = QueueOptions::durable()
            .with_dead_letter(&names.exchange, names.routing_key())
            .merged(&overrides);
        self.declare_queue(queue, main_options).await?;

        info!(
            queue = %queue,
            dead_letter_exchange = %names.exchange,
            dead_letter_queue = %names.queue,
            "Dead-letter topology ready"
        );

        Ok(names)
    }

    async fn send(&self, record: &TopologyRecord) -> Result<(), BrokerError> {
        let active = self.client.session().await?;
        let _channel = self.client.lock_channel().await;
        record.apply(active.session.as_ref()).await?;
        debug!(record = %record, epoch = active.epoch, "Declared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::connection::ConnectionState;
    use crate::memory::InMemoryBroker;
    use std::time::Duration;

    async fn connected(broker: &InMemoryBroker, config: ClientConfig) -> BrokerClient {
        let client = BrokerClient::new(broker.clone(), config);
        client.init().await.unwrap();
        client
    }

    #[test]
    fn test_dead_letter_names() {
        let names = dead_letter_names("Q");
        assert_eq!(names.exchange, "Q_DLX");
        assert_eq!(names.queue, "Q_DLQ");
        assert_eq!(names.routing_key(), "Q_DLQ");
    }

    #[tokio::test]
    async fn test_setup_dead_letter_declares_pair_and_binding() {
        let broker = InMemoryBroker::new();
        let client = connected(&broker, ClientConfig::new()).await;

        let names = client
            .topology()
            .setup_dead_letter("Q", QueueOverrides::default())
            .await
            .unwrap();
        assert_eq!(names, dead_letter_names("Q"));

        let dlx = broker.exchange("Q_DLX").unwrap();
        assert_eq!(dlx.kind, ExchangeKind::Direct);
        assert!(dlx.durable);

        let dlq = broker.queue("Q_DLQ").unwrap();
        assert!(dlq.options.durable);
        assert!(dlq.options.message_ttl.is_none());
        assert!(broker.has_binding("Q_DLQ", "Q_DLX", "Q_DLQ"));

        let main = broker.queue("Q").unwrap();
        assert!(main.options.durable);
        assert_eq!(main.options.dead_letter_exchange.as_deref(), Some("Q_DLX"));
        assert_eq!(main.options.dead_letter_routing_key.as_deref(), Some("Q_DLQ"));
    }

    #[tokio::test]
    async fn test_setup_dead_letter_merges_overrides() {
        let broker = InMemoryBroker::new();
        let client = connected(&broker, ClientConfig::new()).await;

        client
            .topology()
            .setup_dead_letter(
                "Q",
                QueueOverrides {
                    max_length: Some(100),
                    ..QueueOverrides::default()
                },
            )
            .await
            .unwrap();

        let main = broker.queue("Q").unwrap();
        assert_eq!(main.options.max_length, Some(100));
        assert_eq!(main.options.dead_letter_exchange.as_deref(), Some("Q_DLX"));
    }

    #[tokio::test]
    async fn test_expire_policy_sets_dlq_ttl() {
        let broker = InMemoryBroker::new();
        let config = ClientConfig::new().with_dead_letter_policy(DeadLetterPolicy::Expire {
            ttl: Duration::from_secs(3600),
        });
        let client = connected(&broker, config).await;

        client
            .topology()
            .setup_dead_letter("Q", QueueOverrides::default())
            .await
            .unwrap();

        let dlq = broker.queue("Q_DLQ").unwrap();
        assert_eq!(dlq.options.message_ttl, Some(Duration::from_secs(3600)));
        assert!(broker.queue("Q").unwrap().options.message_ttl.is_none());
    }

    #[tokio::test]
    async fn test_identical_redeclaration_is_noop() {
        let broker = InMemoryBroker::new();
        let client = connected(&broker, ClientConfig::new()).await;
        let topology = client.topology();

        for _ in 0..5 {
            topology
                .setup_dead_letter("Q", QueueOverrides::default())
                .await
                .unwrap();
            topology
                .declare_exchange("events", ExchangeKind::Topic, true)
                .await
                .unwrap();
        }

        assert_eq!(broker.binding_count(), 1);
        assert_eq!(client.registry().snapshot().len(), 5);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_conflicting_redeclaration_fails_loudly() {
        let broker = InMemoryBroker::new();
        let client = connected(&broker, ClientConfig::new()).await;
        let topology = client.topology();

        topology
            .declare_queue("orders", QueueOptions::durable())
            .await
            .unwrap();
        let err = topology
            .declare_queue("orders", QueueOptions::transient())
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::TopologyConflict { ref name, .. } if name == "orders"));
        // Rejected client-side; the session is untouched
        assert!(client.is_connected());
        assert!(broker.queue("orders").unwrap().options.durable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_with_foreign_declaration() {
        let broker = InMemoryBroker::new();
        broker.seed_queue(QueueDecl::new("shared", QueueOptions::transient()));
        let client = connected(&broker, ClientConfig::new()).await;

        let err = client
            .topology()
            .declare_queue("shared", QueueOptions::durable())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::TopologyConflict { .. }));

        // The failed declaration is not replayed after the reconnect it caused
        client.ensure_connected().await.unwrap();
        assert!(client.registry().snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_topology_replayed_after_reconnect() {
        let broker = InMemoryBroker::new();
        let client = connected(&broker, ClientConfig::new()).await;
        let topology = client.topology();
        topology
            .declare_exchange("events", ExchangeKind::Fanout, false)
            .await
            .unwrap();
        topology
            .declare_queue("scratch", QueueOptions::transient())
            .await
            .unwrap();
        topology.bind_queue("scratch", "events", "").await.unwrap();

        let mut states = client.subscribe_state();
        broker.restart();
        assert!(broker.exchange("events").is_none());
        states
            .wait_for(|s| *s != ConnectionState::Connected)
            .await
            .unwrap();

        client.ensure_connected().await.unwrap();
        assert_eq!(client.epoch(), 2);
        assert!(broker.exchange("events").is_some());
        assert!(broker.queue("scratch").is_some());
        assert!(broker.has_binding("scratch", "events", ""));
    }
}
