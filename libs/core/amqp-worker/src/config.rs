//! Client configuration
//!
//! This module provides `ClientConfig` and the reconnect/dead-letter policies
//! that drive the connection manager and topology provisioner.

use core_config::broker::{BrokerConfig, DeadLetterRetention};
use std::time::Duration;

/// Fixed-interval reconnect policy.
///
/// There is no backoff growth: every failed attempt waits `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay between a failed attempt (or a lost session) and the next attempt
    pub interval: Duration,
    /// Optional cap on consecutive failed attempts (`None` = retry forever)
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Retry forever at a fixed interval
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// Cap the number of consecutive failed attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Whether `failed_attempts` consecutive failures exhaust the policy
    pub fn is_exhausted(&self, failed_attempts: u32) -> bool {
        self.max_attempts
            .is_some_and(|max| failed_attempts >= max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(5000))
    }
}

/// What the dead-letter queue does with the messages it receives.
///
/// Neither policy replays dead letters; remediation is an operator task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeadLetterPolicy {
    /// Keep dead letters until drained by hand
    #[default]
    Retain,
    /// Broker drops dead letters after `ttl`
    Expire { ttl: Duration },
}

impl From<&DeadLetterRetention> for DeadLetterPolicy {
    fn from(retention: &DeadLetterRetention) -> Self {
        match retention {
            DeadLetterRetention::Retain => DeadLetterPolicy::Retain,
            DeadLetterRetention::Expire(ttl) => DeadLetterPolicy::Expire { ttl: *ttl },
        }
    }
}

/// Configuration for the broker client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Reconnect behaviour after connect failures and lost sessions
    pub reconnect: ReconnectPolicy,

    /// Default prefetch for consumers (outstanding unacked deliveries)
    pub prefetch: u16,

    /// Bound on graceful close
    pub shutdown_timeout: Duration,

    /// Dead-letter queue retention
    pub dead_letter: DeadLetterPolicy,
}

impl ClientConfig {
    /// Create a new ClientConfig with defaults
    pub fn new() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            prefetch: 1,
            shutdown_timeout: Duration::from_millis(10_000),
            dead_letter: DeadLetterPolicy::Retain,
        }
    }

    /// Build from the environment-loaded broker configuration
    pub fn from_broker_config(config: &BrokerConfig) -> Self {
        let mut reconnect = ReconnectPolicy::fixed(config.retry_interval);
        if let Some(max) = config.max_connect_attempts {
            reconnect = reconnect.with_max_attempts(max);
        }

        Self {
            reconnect,
            prefetch: config.prefetch.max(1),
            shutdown_timeout: config.shutdown_timeout,
            dead_letter: DeadLetterPolicy::from(&config.dead_letter_retention),
        }
    }

    /// Set the reconnect policy
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the default consumer prefetch
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    /// Set the graceful shutdown bound
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the dead-letter policy
    pub fn with_dead_letter_policy(mut self, policy: DeadLetterPolicy) -> Self {
        self.dead_letter = policy;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
