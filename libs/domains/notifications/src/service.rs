//! Producer-side facade: builds notification payloads and publishes them.

use crate::error::NotificationResult;
use crate::models::{NotificationKind, NotificationPayload, Recipient, Sender};
use crate::queues::NotificationQueue;
use amqp_worker::{BrokerClient, DeadLetterNames, PublishOptions, QueueOverrides};
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Service for publishing notification requests.
#[derive(Clone)]
pub struct NotificationService {
    client: BrokerClient,
    queue: NotificationQueue,
}

impl NotificationService {
    pub fn new(client: BrokerClient, queue: NotificationQueue) -> Self {
        Self { client, queue }
    }

    pub fn queue(&self) -> &NotificationQueue {
        &self.queue
    }

    /// Connect and assert the queue with its dead-letter pair.
    ///
    /// Both the producer and the worker call this; the declarations are idempotent.
    pub async fn start(&self) -> NotificationResult<DeadLetterNames> {
        self.client.init().await?;
        let names = self
            .client
            .topology()
            .setup_dead_letter(self.queue.name(), QueueOverrides::default())
            .await?;

        info!(
            queue = %self.queue.name(),
            dead_letter_exchange = %names.exchange,
            dead_letter_queue = %names.queue,
            "Notification queues asserted"
        );
        Ok(names)
    }

    /// Publish a notification for `recipient` and return its message id.
    ///
    /// Publish failures are returned to the caller; nothing is retried here.
    pub async fn notify_user(
        &self,
        kind: &str,
        recipient: Recipient,
        message: &str,
        sender: Sender,
    ) -> NotificationResult<String> {
        let payload = NotificationPayload::new(kind, recipient, message, sender, Utc::now());
        let message_id = payload.message_id();

        self.client
            .publisher()
            .publish(
                self.queue.name(),
                &payload,
                PublishOptions::new()
                    .with_message_id(&message_id)
                    .with_timestamp(payload.timestamp),
            )
            .await?;

        info!(
            queue = %self.queue.name(),
            message_id = %message_id,
            kind = %payload.kind,
            user_id = %payload.user_id,
            "Notification published"
        );
        Ok(message_id)
    }

    /// Queue a welcome notification for a newly registered user.
    pub async fn notify_welcome(
        &self,
        recipient: Recipient,
        message: &str,
    ) -> NotificationResult<String> {
        self.notify_user(
            &NotificationKind::Welcome.to_string(),
            recipient,
            message,
            Sender::default(),
        )
        .await
    }

    /// Publish in the background so the caller's response is not held up.
    ///
    /// Failures are logged; the handle can still be awaited for the outcome.
    pub fn spawn_notify(
        &self,
        kind: impl Into<String>,
        recipient: Recipient,
        message: impl Into<String>,
        sender: Sender,
    ) -> JoinHandle<NotificationResult<String>> {
        let service = self.clone();
        let kind = kind.into();
        let message = message.into();

        tokio::spawn(async move {
            let user_id = recipient.user_id.clone();
            let result = service.notify_user(&kind, recipient, &message, sender).await;
            if let Err(e) = &result {
                error!(kind = %kind, user_id = %user_id, error = %e, "Failed to publish notification");
            }
            result
        })
    }
}
