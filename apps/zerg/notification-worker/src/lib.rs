//! Notification Worker Service
//!
//! Consumes notification requests from RabbitMQ and delivers them by email.
//!
//! ## Architecture
//!
//! ```text
//! RabbitMQ (NOTIFICATIONS_QUEUE_REQUEST)
//!   ↓ (prefetch-bounded consumer)
//! NotificationProcessor
//!   ↓ (welcome → email)
//! EmailSender (SMTP / log)
//!
//! failures → NOTIFICATIONS_QUEUE_REQUEST_DLX → NOTIFICATIONS_QUEUE_REQUEST_DLQ
//! ```
//!
//! ## Features
//!
//! - Fixed-interval reconnect with topology re-declaration
//! - Handler-driven ack, failures dead-lettered
//! - Graceful shutdown on SIGINT/SIGTERM, bounded by `BROKER_SHUTDOWN_TIMEOUT_MS`
//! - Health check endpoints for Kubernetes probes
//! - Prometheus metrics

use amqp_worker::{
    health_router, AmqpConnector, BrokerClient, BrokerError, ClientConfig, ConsumeOptions,
    ConsumerHandle, HealthState,
};
use core_config::broker::BrokerConfig;
use core_config::health::HealthConfig;
use core_config::{Environment, FromEnv};
use domain_notifications::{
    EmailSender, LogSender, NotificationProcessor, NotificationQueue, NotificationService,
    SmtpConfig, SmtpSender,
};
use eyre::{Result, WrapErr};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

const APP_NAME: &str = env!("CARGO_PKG_NAME");
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the notification worker
///
/// 1. Sets up structured logging and metrics
/// 2. Starts the health server
/// 3. Connects to the broker and asserts the notification queues
/// 4. Consumes until SIGINT/SIGTERM, then closes the broker connection
///
/// # Errors
///
/// Returns an error if configuration is invalid, the health port cannot be
/// bound, topology conflicts with what the broker has, or shutdown exceeds its
/// bound.
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);
    amqp_worker::init_metrics();

    info!(name = APP_NAME, version = APP_VERSION, "Starting notification worker");
    info!("Environment: {:?}", environment);

    let broker_config =
        BrokerConfig::from_env().wrap_err("Failed to load broker configuration")?;
    let health_config =
        HealthConfig::from_env().wrap_err("Failed to load health server configuration")?;
    let queue = NotificationQueue::from_config(&broker_config);

    let client = BrokerClient::new(
        AmqpConnector::new(&broker_config.url),
        ClientConfig::from_broker_config(&broker_config),
    );

    // Start health server in background
    let router = health_router(HealthState::new(
        client.clone(),
        APP_NAME,
        APP_VERSION,
        queue.name(),
    ));
    let listener = tokio::net::TcpListener::bind(health_config.address())
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", health_config.address()))?;
    info!(address = %health_config.address(), "Health server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "Health server failed");
        }
    });

    let retry_interval = broker_config.retry_interval;
    let started = tokio::select! {
        result = start(&client, &queue, &environment, retry_interval) => Some(result?),
        _ = shutdown_signal() => None,
    };

    if let Some(consumer) = started {
        info!(queue = %queue.name(), consumer_tag = %consumer.consumer_tag(), "Notification worker running");
        tokio::select! {
            _ = shutdown_signal() => {}
            _ = consumer.join() => warn!("Consumer stopped before shutdown was requested"),
        }
    }

    shutdown(&client).await?;
    info!("Notification worker stopped");
    Ok(())
}

async fn start(
    client: &BrokerClient,
    queue: &NotificationQueue,
    environment: &Environment,
    retry_interval: Duration,
) -> Result<ConsumerHandle> {
    if environment.is_production() || std::env::var("SMTP_HOST").is_ok() {
        let config = SmtpConfig::from_env().wrap_err("Invalid SMTP configuration")?;
        info!(host = %config.host, port = config.port, tls = config.use_tls, "Using SMTP email sender");
        let sender = SmtpSender::new(config).wrap_err("Failed to create SMTP sender")?;
        start_worker(client, queue, sender, retry_interval).await
    } else {
        info!("SMTP_HOST not set, emails will be logged instead of sent");
        start_worker(client, queue, LogSender, retry_interval).await
    }
}

/// Assert the notification topology and start consuming.
///
/// Connection-level failures during setup are retried at `retry_interval`;
/// anything else (e.g. a topology conflict) is returned.
pub async fn start_worker<S: EmailSender + 'static>(
    client: &BrokerClient,
    queue: &NotificationQueue,
    sender: S,
    retry_interval: Duration,
) -> Result<ConsumerHandle> {
    let service = NotificationService::new(client.clone(), queue.clone());
    let processor = NotificationProcessor::new(sender);

    loop {
        let attempt = async {
            service.start().await?;
            client
                .consumer()
                .consume(queue.name(), processor.clone(), ConsumeOptions::new())
                .await
                .map_err(domain_notifications::NotificationError::from)
        };

        match attempt.await {
            Ok(handle) => return Ok(handle),
            Err(e) if e.is_connection_error() => {
                warn!(
                    error = %e,
                    retry_in_ms = retry_interval.as_millis() as u64,
                    "Failed to initialize notification consumer, retrying"
                );
                tokio::time::sleep(retry_interval).await;
            }
            Err(e) => return Err(e).wrap_err("Failed to initialize notification consumer"),
        }
    }
}

/// Close the broker connection within its configured bound.
pub async fn shutdown(client: &BrokerClient) -> Result<()> {
    info!("Closing broker connection");
    match client.close().await {
        Ok(()) => Ok(()),
        Err(BrokerError::ShutdownTimeout(bound)) => {
            error!(bound_ms = bound.as_millis() as u64, "Broker shutdown timed out, forcing exit");
            Err(BrokerError::ShutdownTimeout(bound)).wrap_err("Graceful shutdown did not complete")
        }
        Err(e) => Err(e).wrap_err("Failed to close broker connection"),
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
