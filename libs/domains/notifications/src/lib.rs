//! Notifications Domain
//!
//! Producer and consumer halves of the notification pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │ Registration flow   │  ← calls notify_user after responding
//! └──────────┬──────────┘
//!            │
//! ┌──────────▼──────────┐
//! │ NotificationService │  ← builds payload, publishes persistent JSON
//! └──────────┬──────────┘
//!            │
//! ┌──────────▼──────────┐
//! │ NOTIFICATIONS_QUEUE │  ← failures routed to <queue>_DLX → <queue>_DLQ
//! └──────────┬──────────┘
//!            │
//! ┌──────────▼──────────┐
//! │ Notification-       │  ← ack on success, nack (dead-letter) on failure
//! │ Processor           │
//! └──────────┬──────────┘
//!            │
//! ┌──────────▼──────────┐
//! │ EmailSender         │  ← SMTP, or log-only in development
//! └─────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{NotificationQueue, NotificationService, Recipient};
//!
//! let service = NotificationService::new(client, NotificationQueue::default());
//! service.start().await?;
//! service.notify_welcome(Recipient::new(user_id, &email, &name), "Thanks for joining").await?;
//! ```

pub mod error;
pub mod models;
pub mod processor;
pub mod providers;
pub mod queues;
pub mod service;

// Re-export commonly used types
pub use error::{NotificationError, NotificationResult};
pub use models::{NotificationKind, NotificationPayload, Recipient, Sender, WelcomeRequest};
pub use processor::NotificationProcessor;
pub use providers::{EmailSender, LogSender, SmtpConfig, SmtpSender};
pub use queues::NotificationQueue;
pub use service::NotificationService;
