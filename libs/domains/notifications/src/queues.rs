//! Queue definitions for the notifications domain.

use amqp_worker::{dead_letter_names, DeadLetterNames};
use core_config::broker::{BrokerConfig, DEFAULT_NOTIFICATION_QUEUE};

/// The notification request queue shared by producer and consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationQueue {
    name: String,
}

impl NotificationQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::new(config.notification_queue.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<queue>_DLX` / `<queue>_DLQ`
    pub fn dead_letter(&self) -> DeadLetterNames {
        dead_letter_names(&self.name)
    }
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_QUEUE)
    }
}
