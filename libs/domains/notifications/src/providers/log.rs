use super::EmailSender;
use crate::error::NotificationResult;
use async_trait::async_trait;
use tracing::info;

/// Writes emails to the log instead of sending them (development default).
#[derive(Debug, Clone, Default)]
pub struct LogSender;

#[async_trait]
impl EmailSender for LogSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> NotificationResult<()> {
        info!(to = %to, subject = %subject, body = %body, "Email (not sent)");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
