//! Consumer dispatcher
//!
//! This module provides:
//! - `MessageHandler` trait implemented by domain processors
//! - `Consumer` for subscribing a handler to a queue
//! - `ConsumerHandle` for cancelling a subscription
//!
//! Acknowledgment is driven by the handler outcome and happens only after the
//! handler completes. `Ack` acknowledges; `Reject`, an error or a panic nacks
//! without requeue so the broker dead-letters the message. In-flight handlers
//! are bounded by the prefetch count. When the session drops the consumer
//! resubscribes on the next one; unacked messages come back as redeliveries.

use crate::connection::{close_requested, BrokerClient};
use crate::error::{BrokerError, ProcessingError};
use crate::metrics::QueueMetrics;
use crate::transport::{Delivery, DeliveryStream, Session};
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use strum::Display;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What to do with a message once its handler has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Disposition {
    /// Processed; acknowledge
    Ack,
    /// Refuse; nack without requeue (dead-letter)
    Reject,
}

/// Trait for message handlers.
///
/// Returning `Err` is equivalent to `Ok(Disposition::Reject)` but is logged
/// with the error and counted under its label.
///
/// # Example
///
/// ```rust,ignore
/// struct AuditHandler;
///
/// #[async_trait]
/// impl MessageHandler for AuditHandler {
///     async fn handle(&self, delivery: &Delivery) -> Result<Disposition, ProcessingError> {
///         let event: AuditEvent = delivery.json()?;
///         store(event).await.map_err(|e| ProcessingError::handler(e.to_string()))?;
///         Ok(Disposition::Ack)
///     }
///
///     fn name(&self) -> &'static str {
///         "AuditHandler"
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Process a single delivery.
    async fn handle(&self, delivery: &Delivery) -> Result<Disposition, ProcessingError>;

    /// Get the handler name for logging.
    fn name(&self) -> &'static str;
}

/// Options for a subscription
#[derive(Debug, Clone, Default)]
pub struct ConsumeOptions {
    /// Outstanding unacked deliveries (defaults to the client's prefetch)
    pub prefetch: Option<u16>,
    /// Consumer tag (defaults to `<handler>-<uuid>`)
    pub consumer_tag: Option<String>,
}

impl ConsumeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = Some(prefetch.max(1));
        self
    }

    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = Some(tag.into());
        self
    }
}

/// Subscribes handlers to queues.
#[derive(Debug, Clone)]
pub struct Consumer {
    client: BrokerClient,
}

impl Consumer {
    pub fn new(client: BrokerClient) -> Self {
        Self { client }
    }

    /// Subscribe `handler` to `queue`.
    ///
    /// Waits for a connection and starts the subscription before returning,
    /// so a missing queue or closed client is reported here.
    pub async fn consume<H: MessageHandler>(
        &self,
        queue: &str,
        handler: H,
        options: ConsumeOptions,
    ) -> Result<ConsumerHandle, BrokerError> {
        self.consume_shared(queue, Arc::new(handler), options).await
    }

    /// Like [`Consumer::consume`] for a handler that is already shared.
    pub async fn consume_shared(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
        options: ConsumeOptions,
    ) -> Result<ConsumerHandle, BrokerError> {
        let prefetch = options
            .prefetch
            .unwrap_or(self.client.config().prefetch)
            .max(1);
        let consumer_tag = options
            .consumer_tag
            .unwrap_or_else(|| format!("{}-{}", handler.name(), Uuid::new_v4()));

        let subscription = subscribe(&self.client, queue, &consumer_tag, prefetch).await?;

        info!(
            queue = %queue,
            consumer_tag = %consumer_tag,
            handler = handler.name(),
            prefetch,
            "Consumer started"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let run = RunLoop {
            client: self.client.clone(),
            queue: queue.to_string(),
            consumer_tag: consumer_tag.clone(),
            prefetch,
            metrics: QueueMetrics::new(queue, handler.name()),
            handler,
        };
        let task = tokio::spawn(run.run(subscription, stop_rx));

        Ok(ConsumerHandle {
            queue: queue.to_string(),
            consumer_tag,
            stop: stop_tx,
            task,
        })
    }
}

/// Handle to a running subscription.
///
/// Dropping the handle leaves the subscription running until the client closes.
pub struct ConsumerHandle {
    queue: String,
    consumer_tag: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("queue", &self.queue)
            .field("consumer_tag", &self.consumer_tag)
            .finish_non_exhaustive()
    }
}

impl ConsumerHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Whether the subscription loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop receiving, let in-flight handlers finish, then return.
    pub async fn cancel(self) {
        self.stop.send_replace(true);
        if let Err(e) = self.task.await {
            error!(consumer_tag = %self.consumer_tag, error = %e, "Consumer task failed");
        }
    }

    /// Wait for the subscription loop to exit (client closed or cancelled).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(consumer_tag = %self.consumer_tag, error = %e, "Consumer task failed");
        }
    }
}

struct Subscription {
    epoch: u64,
    session: Arc<dyn Session>,
    stream: DeliveryStream,
}

async fn subscribe(
    client: &BrokerClient,
    queue: &str,
    consumer_tag: &str,
    prefetch: u16,
) -> Result<Subscription, BrokerError> {
    let active = client.session().await?;
    let _channel = client.lock_channel().await;
    active.session.set_prefetch(prefetch).await?;
    let stream = active.session.consume(queue, consumer_tag).await?;

    Ok(Subscription {
        epoch: active.epoch,
        session: active.session,
        stream,
    })
}

/// Resolves once the handle requests a stop. Never resolves after the handle is dropped.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

struct RunLoop {
    client: BrokerClient,
    queue: String,
    consumer_tag: String,
    prefetch: u16,
    metrics: QueueMetrics,
    handler: Arc<dyn MessageHandler>,
}

impl RunLoop {
    async fn run(self, initial: Subscription, mut stop: watch::Receiver<bool>) {
        let mut shutdown = self.client.shutdown_signal();
        let semaphore = Arc::new(Semaphore::new(self.prefetch as usize));
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut permit: Option<OwnedSemaphorePermit> = None;
        let mut subscription = Some(initial);

        loop {
            let Some(current) = subscription.as_mut() else {
                let resubscribed = tokio::select! {
                    _ = stop_requested(&mut stop) => break,
                    _ = close_requested(&mut shutdown) => break,
                    result = subscribe(&self.client, &self.queue, &self.consumer_tag, self.prefetch) => result,
                };

                match resubscribed {
                    Ok(next) => {
                        info!(
                            queue = %self.queue,
                            consumer_tag = %self.consumer_tag,
                            epoch = next.epoch,
                            "Consumer resubscribed"
                        );
                        subscription = Some(next);
                    }
                    Err(e) if e.is_terminal() => {
                        warn!(queue = %self.queue, error = %e, "Consumer stopping");
                        break;
                    }
                    Err(e) => {
                        warn!(
                            queue = %self.queue,
                            error = %e,
                            "Failed to resubscribe consumer, retrying"
                        );
                        let interval = self.client.config().reconnect.interval;
                        tokio::select! {
                            _ = stop_requested(&mut stop) => break,
                            _ = close_requested(&mut shutdown) => break,
                            _ = tokio::time::sleep(interval) => {}
                        }
                    }
                }
                continue;
            };

            tokio::select! {
                biased;

                _ = stop_requested(&mut stop) => {
                    let _channel = self.client.lock_channel().await;
                    if let Err(e) = current.session.cancel(&self.consumer_tag).await {
                        debug!(consumer_tag = %self.consumer_tag, error = %e, "Consumer cancel failed");
                    }
                    drop(_channel);
                    while in_flight.join_next().await.is_some() {}
                    info!(queue = %self.queue, consumer_tag = %self.consumer_tag, "Consumer cancelled");
                    return;
                }

                _ = close_requested(&mut shutdown) => break,

                reason = current.session.closed() => {
                    debug!(
                        queue = %self.queue,
                        epoch = current.epoch,
                        reason = %reason,
                        "Consumer session closed, waiting for a new session"
                    );
                    subscription = None;
                }

                Some(joined) = in_flight.join_next() => {
                    if let Err(e) = joined {
                        error!(queue = %self.queue, error = %e, "Dispatch task failed");
                    }
                    self.metrics.in_flight(in_flight.len());
                }

                acquired = semaphore.clone().acquire_owned(), if permit.is_none() => {
                    match acquired {
                        Ok(p) => permit = Some(p),
                        Err(_) => break,
                    }
                }

                next = current.stream.next(), if permit.is_some() => match next {
                    Some(Ok(message)) => {
                        let delivery = Delivery::from_inbound(current.epoch, &self.queue, message);
                        let Some(slot) = permit.take() else { continue };
                        in_flight.spawn(dispatch(
                            self.client.clone(),
                            self.handler.clone(),
                            self.metrics.clone(),
                            delivery,
                            slot,
                        ));
                        self.metrics.in_flight(in_flight.len());
                    }
                    Some(Err(e)) => {
                        warn!(queue = %self.queue, error = %e, "Delivery stream failed");
                        subscription = None;
                    }
                    None => {
                        debug!(
                            queue = %self.queue,
                            consumer_tag = %self.consumer_tag,
                            epoch = current.epoch,
                            "Delivery stream ended, waiting for a new session"
                        );
                        subscription = None;
                    }
                },
            }
        }

        // Handlers still running are abandoned; the broker redelivers their messages.
        if !in_flight.is_empty() {
            info!(
                queue = %self.queue,
                abandoned = in_flight.len(),
                "Consumer stopped with handlers in flight"
            );
        }
        in_flight.abort_all();
        debug!(queue = %self.queue, consumer_tag = %self.consumer_tag, "Consumer stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn dispatch(
    client: BrokerClient,
    handler: Arc<dyn MessageHandler>,
    metrics: QueueMetrics,
    delivery: Delivery,
    _permit: OwnedSemaphorePermit,
) {
    metrics.received();
    let started = Instant::now();

    let outcome = AssertUnwindSafe(handler.handle(&delivery))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(ProcessingError::Panicked(panic_message(panic.as_ref()))));

    let reason = match outcome {
        Ok(Disposition::Ack) => {
            match client.ack(delivery.tag).await {
                Ok(()) => {
                    metrics.acked(started.elapsed());
                    debug!(
                        queue = %delivery.queue,
                        tag = %delivery.tag,
                        message_id = delivery.message_id().unwrap_or(""),
                        handler = handler.name(),
                        "Message acknowledged"
                    );
                }
                Err(e) => error!(
                    queue = %delivery.queue,
                    tag = %delivery.tag,
                    error = %e,
                    "Failed to acknowledge message"
                ),
            }
            return;
        }
        Ok(Disposition::Reject) => {
            info!(
                queue = %delivery.queue,
                tag = %delivery.tag,
                message_id = delivery.message_id().unwrap_or(""),
                handler = handler.name(),
                "Message rejected by handler"
            );
            "rejected"
        }
        Err(e) => {
            warn!(
                queue = %delivery.queue,
                tag = %delivery.tag,
                message_id = delivery.message_id().unwrap_or(""),
                handler = handler.name(),
                redelivered = delivery.redelivered,
                error = %e,
                "Message processing failed, dead-lettering"
            );
            e.label()
        }
    };

    match client.nack(delivery.tag, false).await {
        Ok(()) => metrics.nacked(reason),
        Err(e) => error!(
            queue = %delivery.queue,
            tag = %delivery.tag,
            error = %e,
            "Failed to reject message"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, ReconnectPolicy};
    use crate::memory::InMemoryBroker;
    use crate::publisher::PublishOptions;
    use crate::transport::QueueOverrides;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use test_utils::assertions::eventually;
    use tokio::sync::Notify;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Ack,
        Fail,
        Reject,
        Panic,
    }

    #[derive(Clone)]
    struct TestHandler {
        behaviour: Behaviour,
        calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<Delivery>>>,
        /// When set, every call waits for a permit before finishing
        gate: Option<Arc<Notify>>,
        running: Arc<AtomicUsize>,
        max_running: Arc<AtomicUsize>,
    }

    impl TestHandler {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                calls: Arc::new(AtomicUsize::new(0)),
                seen: Arc::new(Mutex::new(Vec::new())),
                gate: None,
                running: Arc::new(AtomicUsize::new(0)),
                max_running: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageHandler for TestHandler {
        async fn handle(&self, delivery: &Delivery) -> Result<Disposition, ProcessingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(delivery.clone());
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            match self.behaviour {
                Behaviour::Ack => Ok(Disposition::Ack),
                Behaviour::Reject => Ok(Disposition::Reject),
                Behaviour::Fail => Err(ProcessingError::handler("downstream unavailable")),
                Behaviour::Panic => panic!("handler exploded"),
            }
        }

        fn name(&self) -> &'static str {
            "test_handler"
        }
    }

    async fn setup(queue: &str) -> (InMemoryBroker, BrokerClient) {
        let broker = InMemoryBroker::new();
        let client = BrokerClient::new(
            broker.clone(),
            ClientConfig::new()
                .with_reconnect(ReconnectPolicy::fixed(Duration::from_millis(50)))
                .with_shutdown_timeout(Duration::from_secs(1)),
        );
        client.init().await.unwrap();
        client
            .topology()
            .setup_dead_letter(queue, QueueOverrides::default())
            .await
            .unwrap();
        (broker, client)
    }

    async fn publish(client: &BrokerClient, queue: &str, payload: &[u8]) {
        client
            .publisher()
            .publish_bytes(queue, payload.to_vec(), PublishOptions::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_success_acks_exactly_once() {
        let (broker, client) = setup("Q").await;
        let handler = TestHandler::new(Behaviour::Ack);

        let _handle = client
            .consumer()
            .consume("Q", handler.clone(), ConsumeOptions::new())
            .await
            .unwrap();
        publish(&client, "Q", b"hello").await;

        eventually("message acked", || handler.calls() == 1 && broker.unacked("Q") == 0).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(handler.calls(), 1);
        assert_eq!(broker.queue_depth("Q"), 0);
        assert_eq!(broker.queue_depth("Q_DLQ"), 0);
        assert!(!handler.seen.lock().unwrap()[0].redelivered);
    }

    #[tokio::test]
    async fn test_handler_failure_dead_letters_exact_payload() {
        let (broker, client) = setup("Q").await;
        let handler = TestHandler::new(Behaviour::Fail);
        let payload = b"{\"raw\":[0,1,2],\"text\":\"\\u00e9\"}";

        let _handle = client
            .consumer()
            .consume("Q", handler.clone(), ConsumeOptions::new())
            .await
            .unwrap();
        publish(&client, "Q", payload).await;

        eventually("dead-lettered", || broker.queue_depth("Q_DLQ") == 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let dead = broker.messages("Q_DLQ");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload, payload.to_vec());
        assert_eq!(handler.calls(), 1);
        assert_eq!(broker.queue_depth("Q"), 0);
        assert_eq!(broker.unacked("Q"), 0);
    }

    #[tokio::test]
    async fn test_reject_and_panic_are_dead_lettered() {
        for behaviour in [Behaviour::Reject, Behaviour::Panic] {
            let (broker, client) = setup("Q").await;
            let handler = TestHandler::new(behaviour);

            let _handle = client
                .consumer()
                .consume("Q", handler.clone(), ConsumeOptions::new())
                .await
                .unwrap();
            publish(&client, "Q", b"bad").await;

            eventually("dead-lettered", || broker.queue_depth("Q_DLQ") == 1).await;
            assert_eq!(broker.unacked("Q"), 0);
            assert!(client.is_connected());
        }
    }

    #[tokio::test]
    async fn test_prefetch_bounds_concurrent_handlers() {
        let (broker, client) = setup("Q").await;
        let gate = Arc::new(Notify::new());
        let handler = TestHandler::new(Behaviour::Ack).gated(gate.clone());

        let _handle = client
            .consumer()
            .consume("Q", handler.clone(), ConsumeOptions::new().with_prefetch(2))
            .await
            .unwrap();
        for i in 0..5u8 {
            publish(&client, "Q", &[i]).await;
        }

        eventually("second call", || handler.calls() == 2).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.calls(), 2);
        assert_eq!(broker.unacked("Q"), 2);
        assert_eq!(broker.queue_depth("Q"), 3);

        for _ in 0..5 {
            gate.notify_one();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        eventually("all acked", || handler.calls() == 5 && broker.unacked("Q") == 0).await;
        assert!(handler.max_running.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_unacked_message_redelivered_after_reconnect() {
        let (broker, client) = setup("Q").await;
        let gate = Arc::new(Notify::new());
        let handler = TestHandler::new(Behaviour::Ack).gated(gate.clone());

        let _handle = client
            .consumer()
            .consume("Q", handler.clone(), ConsumeOptions::new())
            .await
            .unwrap();
        publish(&client, "Q", b"important").await;
        eventually("first call", || handler.calls() == 1).await;

        // Drop the connection while the handler still holds the message
        broker.drop_connections();
        eventually("reconnected", || client.epoch() == 2 && client.is_connected()).await;

        // The first handler finishes; its ack belongs to the dead session
        gate.notify_one();
        eventually("second call", || handler.calls() == 2).await;
        gate.notify_one();
        eventually("queue drained", || broker.unacked("Q") == 0 && broker.queue_depth("Q") == 0).await;

        let seen = handler.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].payload(), b"important");
        assert!(seen[1].redelivered);
        assert_eq!(seen[1].tag.epoch(), 2);
        assert_eq!(broker.queue_depth("Q_DLQ"), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_consumption() {
        let (broker, client) = setup("Q").await;
        let handler = TestHandler::new(Behaviour::Ack);

        let handle = client
            .consumer()
            .consume(
                "Q",
                handler.clone(),
                ConsumeOptions::new().with_consumer_tag("audit-1"),
            )
            .await
            .unwrap();
        assert_eq!(handle.consumer_tag(), "audit-1");
        assert_eq!(broker.consumer_count("Q"), 1);

        handle.cancel().await;
        assert_eq!(broker.consumer_count("Q"), 0);

        publish(&client, "Q", b"later").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.calls(), 0);
        assert_eq!(broker.queue_depth("Q"), 1);
    }

    #[tokio::test]
    async fn test_close_abandons_in_flight_message() {
        let (broker, client) = setup("Q").await;
        let gate = Arc::new(Notify::new());
        let handler = TestHandler::new(Behaviour::Ack).gated(gate);

        let handle = client
            .consumer()
            .consume("Q", handler.clone(), ConsumeOptions::new())
            .await
            .unwrap();
        publish(&client, "Q", b"in-flight").await;
        eventually("first call", || handler.calls() == 1).await;

        client.close().await.unwrap();
        handle.join().await;

        // Not acked, not dead-lettered: back on the queue for the next consumer
        assert_eq!(broker.queue_depth("Q"), 1);
        assert_eq!(broker.queue_depth("Q_DLQ"), 0);
    }

    #[tokio::test]
    async fn test_run_loop_is_spawnable_across_threads() {
        fn assert_send<T: Send>(_: &T) {}

        let (_broker, client) = setup("Q").await;
        let subscription = subscribe(&client, "Q", "send-check", 1).await.unwrap();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let run = RunLoop {
            client: client.clone(),
            queue: "Q".to_string(),
            consumer_tag: "send-check".to_string(),
            prefetch: 1,
            metrics: QueueMetrics::new("Q", "test_handler"),
            handler: Arc::new(TestHandler::new(Behaviour::Ack)),
        };

        let fut = run.run(subscription, stop_rx);
        assert_send(&fut);
        drop(fut);
        client.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_on_multi_thread_runtime_drains_in_flight() {
        let (broker, client) = setup("Q").await;
        let handler = TestHandler::new(Behaviour::Ack);

        let handle = client
            .consumer()
            .consume("Q", handler.clone(), ConsumeOptions::new())
            .await
            .unwrap();
        publish(&client, "Q", b"one").await;
        eventually("acked", || handler.calls() == 1 && broker.unacked("Q") == 0).await;

        handle.cancel().await;
        assert_eq!(broker.consumer_count("Q"), 0);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_consumer_handle_debug_names_subscription() {
        let (_broker, client) = setup("Q").await;
        let handle = client
            .consumer()
            .consume(
                "Q",
                TestHandler::new(Behaviour::Ack),
                ConsumeOptions::new().with_consumer_tag("debug-1"),
            )
            .await
            .unwrap();

        let rendered = format!("{:?}", handle);
        assert!(rendered.contains("ConsumerHandle"));
        assert!(rendered.contains("\"Q\""));
        assert!(rendered.contains("debug-1"));
        handle.cancel().await;
    }

    #[tokio::test]
    async fn test_consume_missing_queue_fails() {
        let broker = InMemoryBroker::new();
        let client = BrokerClient::new(broker, ClientConfig::new());

        let result = client
            .consumer()
            .consume("missing", TestHandler::new(Behaviour::Ack), ConsumeOptions::new())
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");
    }
}
