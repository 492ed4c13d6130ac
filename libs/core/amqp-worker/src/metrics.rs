//! Prometheus metrics for the broker client
//!
//! Connection-level series are free functions; per-queue series go through
//! [`QueueMetrics`], which carries the labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

use crate::connection::ConnectionState;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() {
    let _ = PROMETHEUS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");
        info!("Prometheus metrics initialized");
        handle
    });
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// Publish the current connection state as a one-hot gauge.
pub fn connection_state(state: ConnectionState) {
    for candidate in ConnectionState::ALL {
        let label: &'static str = candidate.into();
        gauge!("amqp_connection_state", "state" => label)
        .set(if candidate == state { 1.0 } else { 0.0 });
    }
}

/// Record a failed connection attempt
pub fn connect_failed() {
    counter!("amqp_connect_failures_total").increment(1);
}

/// Record a lost session that triggered a reconnect
pub fn reconnect_scheduled() {
    counter!("amqp_reconnects_total").increment(1);
}

/// Record an ack/nack ignored because its delivery tag predates the current session
pub fn stale_settlement(action: &'static str) {
    counter!("amqp_stale_settlements_total", "action" => action).increment(1);
}

/// Queue metrics helper
#[derive(Clone)]
pub struct QueueMetrics {
    /// Queue name for labeling
    queue: String,
    /// Handler name for labeling
    handler: String,
}

impl QueueMetrics {
    /// Create new QueueMetrics
    pub fn new(queue: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            handler: handler.into(),
        }
    }

    /// Record a message accepted by the broker
    pub fn published(&self) {
        counter!(
            "amqp_messages_published_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    /// Record a publish the broker did not accept
    pub fn publish_failed(&self) {
        counter!(
            "amqp_publish_failures_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    /// Record a message being received
    pub fn received(&self) {
        counter!(
            "amqp_messages_received_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);
    }

    /// Record a message acknowledged after its handler succeeded
    pub fn acked(&self, duration: Duration) {
        counter!(
            "amqp_messages_settled_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone(),
            "outcome" => "ack"
        )
        .increment(1);

        histogram!(
            "amqp_handler_duration_seconds",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a message rejected to the dead-letter exchange
    pub fn nacked(&self, reason: &str) {
        counter!(
            "amqp_messages_settled_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone(),
            "outcome" => "nack"
        )
        .increment(1);

        counter!(
            "amqp_handler_errors_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    /// Record a message acknowledged and discarded without processing
    pub fn dropped(&self, reason: &str) {
        counter!(
            "amqp_messages_dropped_total",
            "queue" => self.queue.clone(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    /// Update in-flight handler gauge
    pub fn in_flight(&self, count: usize) {
        gauge!(
            "amqp_handlers_in_flight",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .set(count as f64);
    }
}
