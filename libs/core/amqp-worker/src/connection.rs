//! Broker connection manager
//!
//! `BrokerClient` owns the single connection+channel pair of a process and runs
//! the reconnection state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected (on close/error) -> ...
//!                                         \-> Closing (terminal)
//! ```
//!
//! A background supervisor task does all connecting. Callers only flip the
//! state to `Connecting` and wait on the state watch. Failed attempts wait the
//! fixed retry interval and try again; this is never fatal unless the policy
//! carries an attempt cap. After every successful connect the recorded
//! topology is replayed before the state becomes `Connected`.
//!
//! Each session gets a new epoch. Delivery tags carry the epoch they were
//! issued under, so settling a tag from a previous session is a no-op.

use crate::config::ClientConfig;
use crate::consumer::Consumer;
use crate::error::BrokerError;
use crate::metrics;
use crate::publisher::Publisher;
use crate::topology::{Topology, TopologyRegistry};
use crate::transport::{Connector, DeliveryTag, Session};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use strum::{Display, IntoStaticStr};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 4] = [
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Closing,
    ];
}

/// The live session and the epoch it was opened under.
#[derive(Clone)]
pub(crate) struct ActiveSession {
    pub(crate) epoch: u64,
    pub(crate) session: Arc<dyn Session>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
    wake: Notify,
    active: Mutex<Option<ActiveSession>>,
    channel_lock: tokio::sync::Mutex<()>,
    topology: Mutex<TopologyRegistry>,
    epoch: AtomicU64,
    supervisor_started: AtomicBool,
    exhausted: AtomicBool,
    failed_attempts: AtomicU32,
}

impl Inner {
    fn active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            // Closing is terminal
            if *current == state || *current == ConnectionState::Closing {
                return false;
            }
            *current = state;
            true
        });
        metrics::connection_state(*self.state.borrow());
    }

    /// Disconnected -> Connecting. Returns whether this call made the transition.
    fn begin_connecting(&self) -> bool {
        self.state.send_if_modified(|current| {
            if *current == ConnectionState::Disconnected {
                *current = ConnectionState::Connecting;
                true
            } else {
                false
            }
        })
    }

    fn is_closing(&self) -> bool {
        *self.state.borrow() == ConnectionState::Closing
    }

    async fn connect_once(&self) -> Result<ActiveSession, BrokerError> {
        let session = self.connector.connect().await?;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let records = self
            .topology
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .snapshot();

        if !records.is_empty() {
            let _channel = self.channel_lock.lock().await;
            for record in &records {
                if let Err(e) = record.apply(session.as_ref()).await {
                    error!(record = %record, error = %e, "Failed to re-declare topology after connect");
                    let _ = session.close().await;
                    return Err(e);
                }
            }
            debug!(count = records.len(), epoch, "Topology replayed");
        }

        let active = ActiveSession { epoch, session };

        let installed = {
            let mut slot = self.active();
            let installed = self.state.send_if_modified(|current| {
                if *current == ConnectionState::Connecting {
                    *current = ConnectionState::Connected;
                    true
                } else {
                    false
                }
            });
            if installed {
                *slot = Some(active.clone());
            }
            installed
        };

        if !installed {
            // close() won the race
            let _ = active.session.close().await;
            return Err(BrokerError::Closed);
        }

        metrics::connection_state(ConnectionState::Connected);
        Ok(active)
    }

    fn session_lost(&self, epoch: u64, reason: &str) {
        {
            let mut slot = self.active();
            if slot.as_ref().is_some_and(|active| active.epoch == epoch) {
                *slot = None;
                self.state.send_if_modified(|current| {
                    if *current == ConnectionState::Connected {
                        *current = ConnectionState::Disconnected;
                        true
                    } else {
                        false
                    }
                });
            }
        }

        if self.is_closing() {
            return;
        }

        metrics::connection_state(ConnectionState::Disconnected);
        metrics::reconnect_scheduled();
        warn!(
            epoch,
            reason = %reason,
            retry_in_ms = self.config.reconnect.interval.as_millis() as u64,
            "Broker session lost, reconnecting"
        );
    }

    /// Sleep the retry interval, then move back to `Connecting`.
    ///
    /// Returns false when shutdown was requested while waiting.
    async fn wait_retry(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.config.reconnect.interval) => {}
            _ = close_requested(shutdown) => return false,
        }
        // A caller may already have moved us to Connecting
        self.begin_connecting();
        !self.is_closing()
    }
}

/// Resolves once `close` has been requested or the client is gone.
///
/// The `watch::Ref` is released before returning so the caller stays `Send`.
pub(crate) async fn close_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closing| *closing).await;
}

async fn supervise(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        if *inner.state.borrow() != ConnectionState::Connecting {
            tokio::select! {
                _ = inner.wake.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            continue;
        }

        match inner.connect_once().await {
            Ok(active) => {
                failures = 0;
                inner.failed_attempts.store(0, Ordering::SeqCst);
                info!(
                    connector = inner.connector.name(),
                    epoch = active.epoch,
                    "Connected to message broker"
                );

                let reason = tokio::select! {
                    reason = active.session.closed() => reason,
                    _ = close_requested(&mut shutdown) => break,
                };

                inner.session_lost(active.epoch, &reason);
                if !inner.wait_retry(&mut shutdown).await {
                    break;
                }
            }
            Err(BrokerError::Closed) => break,
            Err(err) => {
                if inner.is_closing() {
                    break;
                }

                failures += 1;
                inner.failed_attempts.store(failures, Ordering::SeqCst);
                metrics::connect_failed();

                if inner.config.reconnect.is_exhausted(failures) {
                    error!(
                        attempts = failures,
                        error = %err,
                        "Giving up connecting to message broker"
                    );
                    inner.exhausted.store(true, Ordering::SeqCst);
                    failures = 0;
                    // Wake waiters even though the state value is unchanged
                    inner.state.send_replace(ConnectionState::Disconnected);
                    metrics::connection_state(ConnectionState::Disconnected);
                    continue;
                }

                warn!(
                    attempt = failures,
                    error = %err,
                    retry_in_ms = inner.config.reconnect.interval.as_millis() as u64,
                    "Failed to connect to message broker, retrying"
                );
                inner.set_state(ConnectionState::Disconnected);

                if !inner.wait_retry(&mut shutdown).await {
                    break;
                }
            }
        }
    }

    debug!("Broker supervisor stopped");
}

/// Handle to the process-wide broker connection.
///
/// Cloning is cheap; all clones share one connection. The background task
/// runs until [`BrokerClient::close`] is called.
#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<Inner>,
}

impl BrokerClient {
    /// Create a client. Nothing connects until `init()` or the first operation.
    pub fn new(connector: impl Connector, config: ClientConfig) -> Self {
        Self::with_connector(Arc::new(connector), config)
    }

    pub fn with_connector(connector: Arc<dyn Connector>, config: ClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                state,
                shutdown,
                wake: Notify::new(),
                active: Mutex::new(None),
                channel_lock: tokio::sync::Mutex::new(()),
                topology: Mutex::new(TopologyRegistry::default()),
                epoch: AtomicU64::new(0),
                supervisor_started: AtomicBool::new(false),
                exhausted: AtomicBool::new(false),
                failed_attempts: AtomicU32::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Epoch of the current session (0 before the first connect)
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Topology provisioner bound to this client
    pub fn topology(&self) -> Topology {
        Topology::new(self.clone())
    }

    /// Publisher bound to this client
    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.clone())
    }

    /// Consumer dispatcher bound to this client
    pub fn consumer(&self) -> Consumer {
        Consumer::new(self.clone())
    }

    fn ensure_supervisor(&self) {
        if self
            .inner
            .supervisor_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tokio::spawn(supervise(self.inner.clone()));
        }
    }

    fn request_connect(&self, reset_exhausted: bool) -> bool {
        if reset_exhausted {
            self.inner.exhausted.store(false, Ordering::SeqCst);
        } else if self.inner.exhausted.load(Ordering::SeqCst) {
            return false;
        }

        self.ensure_supervisor();
        let started = self.inner.begin_connecting();
        if started {
            metrics::connection_state(ConnectionState::Connecting);
            self.inner.wake.notify_one();
        }
        started
    }

    /// Start connecting.
    ///
    /// A no-op while `Connecting` or `Connected`. Otherwise waits for the
    /// first attempt to resolve; a failed attempt is logged and retried in the
    /// background, not returned. Also clears an exhausted attempt cap.
    pub async fn init(&self) -> Result<(), BrokerError> {
        match self.state() {
            ConnectionState::Closing => return Err(BrokerError::Closed),
            ConnectionState::Connecting | ConnectionState::Connected => return Ok(()),
            ConnectionState::Disconnected => {}
        }

        if !self.request_connect(true) {
            return Ok(());
        }

        let mut state = self.subscribe_state();
        state
            .wait_for(|s| *s != ConnectionState::Connecting)
            .await
            .map_err(|_| BrokerError::Closed)?;
        Ok(())
    }

    /// Wait until `Connected`, triggering a connect if needed.
    pub async fn ensure_connected(&self) -> Result<(), BrokerError> {
        self.session().await.map(|_| ())
    }

    fn current(&self) -> Option<ActiveSession> {
        let slot = self.inner.active();
        match self.state() {
            ConnectionState::Connected => slot.clone(),
            _ => None,
        }
    }

    pub(crate) async fn session(&self) -> Result<ActiveSession, BrokerError> {
        loop {
            if let Some(active) = self.current() {
                return Ok(active);
            }
            if self.inner.is_closing() {
                return Err(BrokerError::Closed);
            }
            if self.inner.exhausted.load(Ordering::SeqCst) {
                return Err(BrokerError::RetriesExhausted {
                    attempts: self.inner.failed_attempts.load(Ordering::SeqCst),
                });
            }

            self.request_connect(false);

            let exhausted = &self.inner.exhausted;
            let mut state = self.subscribe_state();
            state
                .wait_for(|s| {
                    matches!(s, ConnectionState::Connected | ConnectionState::Closing)
                        || exhausted.load(Ordering::SeqCst)
                })
                .await
                .map_err(|_| BrokerError::Closed)?;
        }
    }

    /// Serialize access to the channel.
    pub(crate) async fn lock_channel(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.channel_lock.lock().await
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, TopologyRegistry> {
        self.inner
            .topology
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    /// The session a tag belongs to, if it is still the live one.
    fn session_for(&self, tag: DeliveryTag) -> Option<Arc<dyn Session>> {
        self.current()
            .filter(|active| active.epoch == tag.epoch())
            .map(|active| active.session)
    }

    /// Acknowledge a delivery. Stale tags are ignored.
    pub async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        let Some(session) = self.session_for(tag) else {
            debug!(tag = %tag, "Ignoring ack for delivery from a previous session");
            metrics::stale_settlement("ack");
            return Ok(());
        };

        let _channel = self.lock_channel().await;
        match session.ack(tag.value()).await {
            Ok(()) => Ok(()),
            Err(e) if !session.is_open() => {
                warn!(tag = %tag, error = %e, "Ack lost with its session");
                metrics::stale_settlement("ack");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Reject a delivery. Stale tags are ignored.
    pub async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        let Some(session) = self.session_for(tag) else {
            debug!(tag = %tag, "Ignoring nack for delivery from a previous session");
            metrics::stale_settlement("nack");
            return Ok(());
        };

        let _channel = self.lock_channel().await;
        match session.nack(tag.value(), requeue).await {
            Ok(()) => Ok(()),
            Err(e) if !session.is_open() => {
                warn!(tag = %tag, error = %e, "Nack lost with its session");
                metrics::stale_settlement("nack");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Close the channel, then the connection, within the shutdown bound.
    ///
    /// Moves to the terminal `Closing` state and stops consumers. Handlers
    /// still running are abandoned; the broker redelivers their messages.
    /// Calling this more than once is a no-op.
    pub async fn close(&self) -> Result<(), BrokerError> {
        let previous = self.inner.state.send_replace(ConnectionState::Closing);
        if previous == ConnectionState::Closing {
            return Ok(());
        }

        metrics::connection_state(ConnectionState::Closing);
        self.inner.shutdown.send_replace(true);

        let active = self.inner.active().take();
        let Some(active) = active else {
            info!("Broker client closed (no open session)");
            return Ok(());
        };

        let timeout = self.inner.config.shutdown_timeout;
        info!(timeout_ms = timeout.as_millis() as u64, "Closing broker connection");

        match tokio::time::timeout(timeout, active.session.close()).await {
            Ok(Ok(())) => {
                info!("Broker connection closed");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Broker connection did not close cleanly");
                Ok(())
            }
            Err(_) => {
                error!(timeout_ms = timeout.as_millis() as u64, "Broker shutdown timed out");
                Err(BrokerError::ShutdownTimeout(timeout))
            }
        }
    }
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("connector", &self.inner.connector.name())
            .field("state", &self.state())
            .field("epoch", &self.epoch())
            .finish()
    }
}
