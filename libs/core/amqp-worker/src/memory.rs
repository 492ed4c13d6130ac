//! In-process broker implementing the `Connector`/`Session` contract.
//!
//! Behaves like a single RabbitMQ node for the features the client relies on:
//! - durable/argument-checked exchange and queue declarations
//! - default-exchange publishing, direct/fanout/topic bindings
//! - manual ack/nack with dead-letter routing on nack-without-requeue
//! - per-consumer prefetch and round-robin dispatch
//! - requeue (flagged as redelivered) of unacked messages when a session ends
//! - a conflicting declaration or unknown delivery tag closes the session
//!
//! Fault injection hooks let tests drop connections, refuse connects, reject
//! publishes and stall shutdown. Message TTLs are recorded but not enforced.

use crate::error::BrokerError;
use crate::transport::{
    BindingDecl, Connector, DeliveryStream, Envelope, ExchangeDecl, ExchangeKind, InboundMessage,
    QueueDecl, Session,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

type ClosedSignal = Arc<watch::Sender<Option<String>>>;

#[derive(Debug, Clone)]
struct StoredMessage {
    envelope: Envelope,
    redelivered: bool,
}

struct MemoryQueue {
    decl: QueueDecl,
    ready: VecDeque<StoredMessage>,
    next_consumer: usize,
}

impl MemoryQueue {
    fn enqueue(&mut self, message: StoredMessage) {
        self.ready.push_back(message);
        if let Some(max) = self.decl.options.max_length {
            while self.ready.len() > max as usize {
                self.ready.pop_front();
            }
        }
    }
}

struct MemoryConsumer {
    tag: String,
    queue: String,
    prefetch: u16,
    in_flight: usize,
    sender: mpsc::UnboundedSender<Result<InboundMessage, BrokerError>>,
}

impl MemoryConsumer {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.in_flight < self.prefetch as usize
    }
}

struct Unacked {
    queue: String,
    consumer_tag: String,
    message: StoredMessage,
}

struct SessionState {
    prefetch: u16,
    next_tag: u64,
    unacked: BTreeMap<u64, Unacked>,
    consumers: Vec<MemoryConsumer>,
    closed: ClosedSignal,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeDecl>,
    queues: HashMap<String, MemoryQueue>,
    bindings: Vec<BindingDecl>,
    sessions: BTreeMap<u64, SessionState>,
    next_session: u64,
    connect_attempts: u64,
    offline: bool,
    refuse_next: u32,
    reject_publishes: u32,
    hang_on_close: bool,
}

impl BrokerState {
    fn session_mut(&mut self, id: u64) -> Result<&mut SessionState, BrokerError> {
        self.sessions
            .get_mut(&id)
            .ok_or_else(|| BrokerError::Channel("channel is closed".to_string()))
    }

    /// End a session: stop its consumers and requeue everything it held.
    fn terminate_session(&mut self, id: u64, reason: &str) {
        let Some(session) = self.sessions.remove(&id) else {
            return;
        };

        // Reverse tag order + push_front keeps the original queue order.
        for (_, unacked) in session.unacked.into_iter().rev() {
            if let Some(queue) = self.queues.get_mut(&unacked.queue) {
                queue.ready.push_front(StoredMessage {
                    redelivered: true,
                    ..unacked.message
                });
            }
        }

        session.closed.send_replace(Some(reason.to_string()));
        debug!(session = id, reason = %reason, "In-memory session terminated");
        self.pump();
    }

    fn pump(&mut self) {
        let names: Vec<String> = self.queues.keys().cloned().collect();
        for name in names {
            self.pump_queue(&name);
        }
    }

    fn pump_queue(&mut self, name: &str) {
        let BrokerState {
            queues, sessions, ..
        } = self;

        let Some(queue) = queues.get_mut(name) else {
            return;
        };

        while !queue.ready.is_empty() {
            let candidates: Vec<(u64, usize)> = sessions
                .iter()
                .flat_map(|(id, session)| {
                    session
                        .consumers
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| c.queue == name && c.has_capacity())
                        .map(move |(idx, _)| (*id, idx))
                })
                .collect();

            if candidates.is_empty() {
                return;
            }

            let (session_id, idx) = candidates[queue.next_consumer % candidates.len()];
            queue.next_consumer = queue.next_consumer.wrapping_add(1);

            let Some(message) = queue.ready.pop_front() else {
                return;
            };
            let Some(session) = sessions.get_mut(&session_id) else {
                queue.ready.push_front(message);
                return;
            };

            let tag = session.next_tag + 1;
            let consumer = &mut session.consumers[idx];
            let inbound = InboundMessage {
                delivery_tag: tag,
                redelivered: message.redelivered,
                envelope: message.envelope.clone(),
            };

            if consumer.sender.send(Ok(inbound)).is_err() {
                // Receiver went away without cancelling
                session.consumers.remove(idx);
                queue.ready.push_front(message);
                continue;
            }

            consumer.in_flight += 1;
            let consumer_tag = consumer.tag.clone();
            session.next_tag = tag;
            session.unacked.insert(
                tag,
                Unacked {
                    queue: name.to_string(),
                    consumer_tag,
                    message,
                },
            );
        }
    }

    fn route(&mut self, exchange: &str, routing_key: &str, envelope: &Envelope) -> usize {
        let Some(kind) = self.exchanges.get(exchange).map(|e| e.kind) else {
            return 0;
        };

        let mut targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && binding_matches(kind, &b.routing_key, routing_key))
            .map(|b| b.queue.clone())
            .collect();
        targets.dedup();

        let mut routed = 0;
        for target in targets {
            if let Some(queue) = self.queues.get_mut(&target) {
                queue.enqueue(StoredMessage {
                    envelope: envelope.clone(),
                    redelivered: false,
                });
                routed += 1;
            }
        }
        routed
    }

    fn dead_letter(&mut self, queue_name: &str, message: StoredMessage) {
        let Some(queue) = self.queues.get(queue_name) else {
            return;
        };
        let Some(exchange) = queue.decl.options.dead_letter_exchange.clone() else {
            debug!(queue = %queue_name, "Rejected message dropped (no dead-letter exchange)");
            return;
        };
        let routing_key = queue
            .decl
            .options
            .dead_letter_routing_key
            .clone()
            .unwrap_or_else(|| queue_name.to_string());

        let routed = self.route(&exchange, &routing_key, &message.envelope);
        debug!(
            queue = %queue_name,
            exchange = %exchange,
            routing_key = %routing_key,
            routed,
            "Rejected message dead-lettered"
        );
    }

    fn settle(&mut self, session_id: u64, tag: u64) -> Result<Unacked, BrokerError> {
        let session = self.session_mut(session_id)?;
        match session.unacked.remove(&tag) {
            Some(unacked) => {
                if let Some(consumer) = session
                    .consumers
                    .iter_mut()
                    .find(|c| c.tag == unacked.consumer_tag)
                {
                    consumer.in_flight = consumer.in_flight.saturating_sub(1);
                }
                Ok(unacked)
            }
            None => {
                let reason = format!("PRECONDITION_FAILED - unknown delivery tag {}", tag);
                self.terminate_session(session_id, &reason);
                Err(BrokerError::Channel(reason))
            }
        }
    }
}

fn binding_matches(kind: ExchangeKind, binding_key: &str, routing_key: &str) -> bool {
    match kind {
        ExchangeKind::Direct => binding_key == routing_key,
        ExchangeKind::Fanout => true,
        ExchangeKind::Topic => {
            let pattern: Vec<&str> = binding_key.split('.').collect();
            let words: Vec<&str> = routing_key.split('.').collect();
            topic_matches(&pattern, &words)
        }
        ExchangeKind::Headers => false,
    }
}

fn topic_matches(pattern: &[&str], words: &[&str]) -> bool {
    match (pattern.first(), words.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            topic_matches(&pattern[1..], words)
                || (!words.is_empty() && topic_matches(pattern, &words[1..]))
        }
        (Some(&"*"), Some(_)) => topic_matches(&pattern[1..], &words[1..]),
        (Some(p), Some(w)) if p == w => topic_matches(&pattern[1..], &words[1..]),
        _ => false,
    }
}

/// In-process broker. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the broker unreachable (or reachable again). Going offline drops every session.
    pub fn set_offline(&self, offline: bool) {
        let mut state = self.lock();
        state.offline = offline;
        if offline {
            let ids: Vec<u64> = state.sessions.keys().copied().collect();
            for id in ids {
                state.terminate_session(id, "connection reset by peer");
            }
        }
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_connections(&self, count: u32) {
        self.lock().refuse_next = count;
    }

    /// Force-close every open session, as a network fault would.
    pub fn drop_connections(&self) {
        let mut state = self.lock();
        let ids: Vec<u64> = state.sessions.keys().copied().collect();
        for id in ids {
            state.terminate_session(id, "connection reset by peer");
        }
    }

    /// Simulate a broker restart: drop every session, then forget non-durable
    /// exchanges and queues along with their bindings.
    pub fn restart(&self) {
        let mut state = self.lock();
        let ids: Vec<u64> = state.sessions.keys().copied().collect();
        for id in ids {
            state.terminate_session(id, "broker restarted");
        }

        state.exchanges.retain(|_, e| e.durable);
        state
            .queues
            .retain(|_, q| q.decl.options.durable && !q.decl.options.auto_delete);

        let BrokerState {
            exchanges,
            queues,
            bindings,
            ..
        } = &mut *state;
        bindings.retain(|b| exchanges.contains_key(&b.exchange) && queues.contains_key(&b.queue));
    }

    /// Reject the next `count` publishes as if the channel buffer were full.
    pub fn reject_publishes(&self, count: u32) {
        self.lock().reject_publishes = count;
    }

    /// Make `Session::close` never complete.
    pub fn hang_on_close(&self, hang: bool) {
        self.lock().hang_on_close = hang;
    }

    /// Total connection attempts seen, successful or not.
    pub fn connect_attempts(&self) -> u64 {
        self.lock().connect_attempts
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Ready (undelivered) messages in `queue`.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Delivered but unsettled messages taken from `queue`.
    pub fn unacked(&self, queue: &str) -> usize {
        self.lock()
            .sessions
            .values()
            .flat_map(|s| s.unacked.values())
            .filter(|u| u.queue == queue)
            .count()
    }

    /// Snapshot of ready messages in `queue`, head first.
    pub fn messages(&self, queue: &str) -> Vec<Envelope> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.envelope.clone()).collect())
            .unwrap_or_default()
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.lock()
            .sessions
            .values()
            .flat_map(|s| s.consumers.iter())
            .filter(|c| c.queue == queue)
            .count()
    }

    pub fn exchange(&self, name: &str) -> Option<ExchangeDecl> {
        self.lock().exchanges.get(name).cloned()
    }

    pub fn queue(&self, name: &str) -> Option<QueueDecl> {
        self.lock().queues.get(name).map(|q| q.decl.clone())
    }

    pub fn has_binding(&self, queue: &str, exchange: &str, routing_key: &str) -> bool {
        self.lock()
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.exchange == exchange && b.routing_key == routing_key)
    }

    pub fn binding_count(&self) -> usize {
        self.lock().bindings.len()
    }

    /// Declare a queue out-of-band, as another process would.
    pub fn seed_queue(&self, decl: QueueDecl) {
        let mut state = self.lock();
        state.queues.entry(decl.name.clone()).or_insert(MemoryQueue {
            decl,
            ready: VecDeque::new(),
            next_consumer: 0,
        });
    }

    /// Publish without a session through the default exchange.
    pub fn inject(&self, queue: &str, envelope: Envelope) {
        let mut state = self.lock();
        if let Some(q) = state.queues.get_mut(queue) {
            q.enqueue(StoredMessage {
                envelope,
                redelivered: false,
            });
        }
        state.pump_queue(queue);
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn Session>, BrokerError> {
        let mut state = self.lock();
        state.connect_attempts += 1;

        if state.offline {
            return Err(BrokerError::Connection("broker unreachable".to_string()));
        }
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(BrokerError::Connection("connection refused".to_string()));
        }

        state.next_session += 1;
        let id = state.next_session;
        let (closed, _) = watch::channel(None);
        let closed = Arc::new(closed);
        state.sessions.insert(
            id,
            SessionState {
                prefetch: 0,
                next_tag: 0,
                unacked: BTreeMap::new(),
                consumers: Vec::new(),
                closed: closed.clone(),
            },
        );

        Ok(Arc::new(MemorySession {
            id,
            broker: self.clone(),
            closed,
        }))
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

/// Session on an [`InMemoryBroker`].
pub struct MemorySession {
    id: u64,
    broker: InMemoryBroker,
    closed: ClosedSignal,
}

#[async_trait]
impl Session for MemorySession {
    async fn declare_exchange(&self, decl: &ExchangeDecl) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.session_mut(self.id)?;

        match state.exchanges.get(&decl.name) {
            Some(existing) if existing == decl => Ok(()),
            Some(existing) => {
                let reason = format!(
                    "PRECONDITION_FAILED - inequivalent arg for exchange '{}' (existing {:?}/durable={}, requested {:?}/durable={})",
                    decl.name, existing.kind, existing.durable, decl.kind, decl.durable
                );
                state.terminate_session(self.id, &reason);
                Err(BrokerError::conflict(&decl.name, reason))
            }
            None => {
                state.exchanges.insert(decl.name.clone(), decl.clone());
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, decl: &QueueDecl) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.session_mut(self.id)?;

        match state.queues.get(&decl.name) {
            Some(existing) if existing.decl == *decl => Ok(()),
            Some(existing) => {
                let reason = format!(
                    "PRECONDITION_FAILED - inequivalent arg for queue '{}' (existing {:?}, requested {:?})",
                    decl.name, existing.decl.options, decl.options
                );
                state.terminate_session(self.id, &reason);
                Err(BrokerError::conflict(&decl.name, reason))
            }
            None => {
                state.queues.insert(
                    decl.name.clone(),
                    MemoryQueue {
                        decl: decl.clone(),
                        ready: VecDeque::new(),
                        next_consumer: 0,
                    },
                );
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, binding: &BindingDecl) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.session_mut(self.id)?;

        if !state.queues.contains_key(&binding.queue) || !state.exchanges.contains_key(&binding.exchange) {
            let reason = format!(
                "NOT_FOUND - cannot bind '{}' to '{}'",
                binding.queue, binding.exchange
            );
            state.terminate_session(self.id, &reason);
            return Err(BrokerError::Channel(reason));
        }

        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
        }
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.session_mut(self.id)?.prefetch = count;
        Ok(())
    }

    async fn publish(&self, queue: &str, envelope: &Envelope) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.session_mut(self.id)?;

        if state.reject_publishes > 0 {
            state.reject_publishes -= 1;
            return Err(BrokerError::publish(queue, "channel write buffer is full"));
        }

        match state.queues.get_mut(queue) {
            Some(q) => {
                q.enqueue(StoredMessage {
                    envelope: envelope.clone(),
                    redelivered: false,
                });
                state.pump_queue(queue);
            }
            None => debug!(queue = %queue, "Unroutable message dropped"),
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError> {
        let mut state = self.broker.lock();
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::Channel(format!("NOT_FOUND - no queue '{}'", queue)));
        }

        let session = state.session_mut(self.id)?;
        if session.consumers.iter().any(|c| c.tag == consumer_tag) {
            return Err(BrokerError::Channel(format!(
                "NOT_ALLOWED - consumer tag '{}' already in use",
                consumer_tag
            )));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let prefetch = session.prefetch;
        session.consumers.push(MemoryConsumer {
            tag: consumer_tag.to_string(),
            queue: queue.to_string(),
            prefetch,
            in_flight: 0,
            sender,
        });
        state.pump_queue(queue);

        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        let session = state.session_mut(self.id)?;
        session.consumers.retain(|c| c.tag != consumer_tag);
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        let unacked = state.settle(self.id, delivery_tag)?;
        state.pump_queue(&unacked.queue);
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        let unacked = state.settle(self.id, delivery_tag)?;

        if requeue {
            if let Some(queue) = state.queues.get_mut(&unacked.queue) {
                queue.ready.push_front(StoredMessage {
                    redelivered: true,
                    ..unacked.message
                });
            }
        } else {
            state.dead_letter(&unacked.queue, unacked.message);
        }

        state.pump();
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let hang = self.broker.lock().hang_on_close;
        if hang {
            std::future::pending::<()>().await;
        }
        self.broker.lock().terminate_session(self.id, "closed by client");
        Ok(())
    }

    async fn closed(&self) -> String {
        let mut receiver = self.closed.subscribe();
        match receiver.wait_for(|reason| reason.is_some()).await {
            Ok(reason) => reason.clone().unwrap_or_default(),
            Err(_) => "session dropped".to_string(),
        }
    }

    fn is_open(&self) -> bool {
        self.closed.borrow().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::QueueOptions;

    async fn session(broker: &InMemoryBroker) -> Arc<dyn Session> {
        broker.connect().await.unwrap()
    }

    #[test]
    fn test_topic_matching() {
        assert!(binding_matches(ExchangeKind::Topic, "user.*", "user.created"));
        assert!(binding_matches(ExchangeKind::Topic, "user.#", "user.a.b"));
        assert!(binding_matches(ExchangeKind::Topic, "#", "anything.at.all"));
        assert!(!binding_matches(ExchangeKind::Topic, "user.*", "user.a.b"));
        assert!(binding_matches(ExchangeKind::Direct, "k", "k"));
        assert!(!binding_matches(ExchangeKind::Direct, "k", "j"));
        assert!(binding_matches(ExchangeKind::Fanout, "", "whatever"));
    }

    #[tokio::test]
    async fn test_refused_and_offline_connects() {
        let broker = InMemoryBroker::new();
        broker.refuse_connections(1);
        assert!(broker.connect().await.is_err());
        assert!(broker.connect().await.is_ok());

        broker.set_offline(true);
        assert!(broker.connect().await.is_err());
        assert_eq!(broker.connect_attempts(), 3);
        assert_eq!(broker.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_conflicting_queue_closes_session() {
        let broker = InMemoryBroker::new();
        let s = session(&broker).await;

        s.declare_queue(&QueueDecl::new("q", QueueOptions::durable())).await.unwrap();
        s.declare_queue(&QueueDecl::new("q", QueueOptions::durable())).await.unwrap();

        let err = s
            .declare_queue(&QueueDecl::new("q", QueueOptions::transient()))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::TopologyConflict { .. }));
        assert!(!s.is_open());
        assert!(s.closed().await.contains("PRECONDITION_FAILED"));
    }

    #[tokio::test]
    async fn test_prefetch_limits_outstanding_deliveries() {
        let broker = InMemoryBroker::new();
        let s = session(&broker).await;
        s.declare_queue(&QueueDecl::new("q", QueueOptions::durable())).await.unwrap();
        for i in 0..3u8 {
            s.publish("q", &Envelope::new(vec![i])).await.unwrap();
        }

        s.set_prefetch(1).await.unwrap();
        let mut stream = s.consume("q", "c1").await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.envelope.payload, vec![0]);
        assert_eq!(broker.unacked("q"), 1);
        assert_eq!(broker.queue_depth("q"), 2);

        s.ack(first.delivery_tag).await.unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.envelope.payload, vec![1]);
    }

    #[tokio::test]
    async fn test_unacked_requeued_when_session_drops() {
        let broker = InMemoryBroker::new();
        let s = session(&broker).await;
        s.declare_queue(&QueueDecl::new("q", QueueOptions::durable())).await.unwrap();
        s.publish("q", &Envelope::new(b"m".to_vec())).await.unwrap();

        let mut stream = s.consume("q", "c1").await.unwrap();
        let delivered = stream.next().await.unwrap().unwrap();
        assert!(!delivered.redelivered);

        broker.drop_connections();
        assert!(stream.next().await.is_none());
        assert_eq!(broker.queue_depth("q"), 1);

        let s2 = session(&broker).await;
        let mut stream = s2.consume("q", "c2").await.unwrap();
        let again = stream.next().await.unwrap().unwrap();
        assert!(again.redelivered);
        assert_eq!(again.envelope.payload, b"m".to_vec());
    }

    #[tokio::test]
    async fn test_nack_routes_through_dead_letter_exchange() {
        let broker = InMemoryBroker::new();
        let s = session(&broker).await;
        s.declare_exchange(&ExchangeDecl::new("Q_DLX", ExchangeKind::Direct, true))
            .await
            .unwrap();
        s.declare_queue(&QueueDecl::new("Q_DLQ", QueueOptions::durable())).await.unwrap();
        s.bind_queue(&BindingDecl::new("Q_DLQ", "Q_DLX", "Q_DLQ")).await.unwrap();
        s.declare_queue(&QueueDecl::new(
            "Q",
            QueueOptions::durable().with_dead_letter("Q_DLX", "Q_DLQ"),
        ))
        .await
        .unwrap();

        s.publish("Q", &Envelope::new(b"payload".to_vec())).await.unwrap();
        let mut stream = s.consume("Q", "c").await.unwrap();
        let delivered = stream.next().await.unwrap().unwrap();
        s.nack(delivered.delivery_tag, false).await.unwrap();

        assert_eq!(broker.queue_depth("Q"), 0);
        assert_eq!(broker.messages("Q_DLQ")[0].payload, b"payload".to_vec());
    }

    #[tokio::test]
    async fn test_unknown_delivery_tag_closes_session() {
        let broker = InMemoryBroker::new();
        let s = session(&broker).await;
        assert!(s.ack(42).await.is_err());
        assert!(!s.is_open());
    }

    #[tokio::test]
    async fn test_max_length_drops_head() {
        let broker = InMemoryBroker::new();
        broker.seed_queue(QueueDecl::new("q", QueueOptions::durable().with_max_length(2)));
        for i in 0..3u8 {
            broker.inject("q", Envelope::new(vec![i]));
        }
        let payloads: Vec<Vec<u8>> = broker.messages("q").into_iter().map(|e| e.payload).collect();
        assert_eq!(payloads, vec![vec![1], vec![2]]);
    }
}
