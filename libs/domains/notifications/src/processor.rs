//! Consumer-side processor for notification requests.
//!
//! Implements [`MessageHandler`] so it can be plugged into the broker's consumer
//! dispatcher. Outcomes:
//! - known kind delivered: ack
//! - unknown kind: ack and drop (counted, logged, never dead-lettered)
//! - undecodable payload or send failure: error, which dead-letters the message

use crate::error::NotificationResult;
use crate::models::{kind_of, NotificationKind, WelcomeRequest};
use crate::providers::EmailSender;
use amqp_worker::{Delivery, Disposition, MessageHandler, ProcessingError, QueueMetrics};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Subject line of the welcome email.
pub fn welcome_subject(name: &str) -> String {
    format!("Welcome to our app, {}!", name)
}

/// Routes notification payloads to the matching downstream action.
pub struct NotificationProcessor<S: EmailSender> {
    sender: Arc<S>,
}

impl<S: EmailSender> NotificationProcessor<S> {
    pub fn new(sender: S) -> Self {
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_arc(sender: Arc<S>) -> Self {
        Self { sender }
    }

    async fn send_welcome(&self, request: &WelcomeRequest) -> NotificationResult<()> {
        self.sender
            .send(
                &request.user_email,
                &welcome_subject(&request.user_name),
                &request.message,
            )
            .await
    }
}

impl<S: EmailSender> Clone for NotificationProcessor<S> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

#[async_trait]
impl<S: EmailSender + 'static> MessageHandler for NotificationProcessor<S> {
    async fn handle(&self, delivery: &Delivery) -> Result<Disposition, ProcessingError> {
        // Only the tag is read before routing; unknown kinds never reach a strict decode
        let request: Value = delivery.json()?;

        let Some(kind) = kind_of(&request) else {
            warn!(
                queue = %delivery.queue,
                message_id = delivery.message_id().unwrap_or(""),
                kind = request.get("type").and_then(serde_json::Value::as_str).unwrap_or("<missing>"),
                "Unknown notification type, dropping"
            );
            QueueMetrics::new(&delivery.queue, self.name()).dropped("unknown_type");
            return Ok(Disposition::Ack);
        };

        let user_id = match kind {
            NotificationKind::Welcome => {
                let welcome: WelcomeRequest = serde_json::from_value(request)?;
                self.send_welcome(&welcome).await?;
                welcome.user_id
            }
        };

        info!(
            queue = %delivery.queue,
            message_id = delivery.message_id().unwrap_or(""),
            kind = %kind,
            user_id = %user_id,
            sender = self.sender.name(),
            "Notification delivered"
        );
        Ok(Disposition::Ack)
    }

    fn name(&self) -> &'static str {
        "notification_processor"
    }
}
