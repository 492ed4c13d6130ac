//! Email senders.
//!
//! The processor only needs `send(to, subject, body)`; the transport behind it
//! is chosen by the worker binary.

mod log;
mod smtp;

pub use log::LogSender;
pub use smtp::{SmtpConfig, SmtpSender};

use crate::error::NotificationResult;
use async_trait::async_trait;

/// Downstream email-sending collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send a plain-text email.
    async fn send(&self, to: &str, subject: &str, body: &str) -> NotificationResult<()>;

    /// Sender name for logging.
    fn name(&self) -> &'static str;
}
