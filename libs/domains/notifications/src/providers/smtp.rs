//! SMTP email sender using lettre.
//!
//! Plaintext transport for local catchers (MailHog/Mailpit), TLS relay otherwise.

use super::EmailSender;
use crate::error::{NotificationError, NotificationResult};
use async_trait::async_trait;
use core_config::{env_or_default, env_parse, ConfigError, Environment, FromEnv};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::env;
use tracing::{debug, error, info};

/// SMTP configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// SMTP server host.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Sender email address.
    pub from_email: String,
    /// Sender name.
    pub from_name: String,
    /// SMTP username (optional for dev servers like Mailpit).
    pub username: Option<String>,
    /// SMTP password (optional for dev servers like Mailpit).
    pub password: Option<String>,
    /// Whether to use TLS (false for local dev servers).
    pub use_tls: bool,
}

impl SmtpConfig {
    /// Create a new SMTP configuration.
    pub fn new(host: String, port: u16, from_email: String, from_name: String) -> Self {
        Self {
            host,
            port,
            from_email,
            from_name,
            username: None,
            password: None,
            use_tls: false,
        }
    }

    /// Builder method to set TLS.
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Builder method to set credentials.
    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }
}

impl FromEnv for SmtpConfig {
    /// Defaults target a local Mailpit on port 1025; TLS defaults on in production.
    fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from_env();
        Ok(Self {
            host: env_or_default("SMTP_HOST", "localhost"),
            port: env_parse("SMTP_PORT", 1025)?,
            from_email: env_or_default("SMTP_FROM_EMAIL", "noreply@localhost"),
            from_name: env_or_default("SMTP_FROM_NAME", "Notifications"),
            username: env::var("SMTP_USERNAME").ok(),
            password: env::var("SMTP_PASSWORD").ok(),
            use_tls: env_parse("SMTP_USE_TLS", environment.use_tls())?,
        })
    }
}

/// SMTP email sender.
pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    config: SmtpConfig,
}

impl SmtpSender {
    /// Create a new SMTP sender.
    pub fn new(config: SmtpConfig) -> NotificationResult<Self> {
        let transport = Self::build_transport(&config)?;
        let from = format!("{} <{}>", config.from_name, config.from_email)
            .parse()
            .map_err(|e| NotificationError::InvalidEmail(format!("from address: {}", e)))?;
        Ok(Self {
            transport,
            from,
            config,
        })
    }

    fn build_transport(config: &SmtpConfig) -> NotificationResult<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| NotificationError::ProviderError(format!("Failed to create SMTP relay: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        }
        .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    fn build_message(&self, to: &str, subject: &str, body: &str) -> NotificationResult<Message> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| NotificationError::InvalidEmail(format!("'{}': {}", to, e)))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotificationError::ProviderError(format!("Failed to build email message: {}", e)))
    }
}

#[async_trait]
impl EmailSender for SmtpSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> NotificationResult<()> {
        debug!(
            to = %to,
            subject = %subject,
            host = %self.config.host,
            port = %self.config.port,
            "Sending email via SMTP"
        );

        let message = self.build_message(to, subject, body)?;

        let response = self.transport.send(message).await.map_err(|e| {
            error!(to = %to, error = %e, "Failed to send email via SMTP");
            NotificationError::ProviderError(format!("SMTP send failed: {}", e))
        })?;

        let message_id = response.message().next().map(|s| s.to_string());
        info!(to = %to, message_id = ?message_id, "Email sent via SMTP");

        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMTP_VARS: [&str; 8] = [
        "APP_ENV",
        "SMTP_HOST",
        "SMTP_PORT",
        "SMTP_FROM_EMAIL",
        "SMTP_FROM_NAME",
        "SMTP_USERNAME",
        "SMTP_PASSWORD",
        "SMTP_USE_TLS",
    ];

    fn cleared() -> Vec<(&'static str, Option<&'static str>)> {
        SMTP_VARS.iter().map(|k| (*k, None)).collect()
    }

    #[test]
    fn test_smtp_config_defaults() {
        temp_env::with_vars(cleared(), || {
            let config = SmtpConfig::from_env().unwrap();
            assert_eq!(config.host, "localhost");
            assert_eq!(config.port, 1025);
            assert!(!config.use_tls);
            assert!(config.username.is_none());
        });
    }

    #[test]
    fn test_smtp_config_production_defaults_to_tls() {
        let mut vars = cleared();
        vars[0] = ("APP_ENV", Some("production"));
        temp_env::with_vars(vars, || {
            assert!(SmtpConfig::from_env().unwrap().use_tls);
        });
    }

    #[test]
    fn test_smtp_config_rejects_bad_port() {
        let mut vars = cleared();
        vars[2] = ("SMTP_PORT", Some("smtp"));
        temp_env::with_vars(vars, || {
            let err = SmtpConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("SMTP_PORT"));
        });
    }

    #[test]
    fn test_smtp_config_with_tls() {
        let config = SmtpConfig::new(
            "smtp.gmail.com".to_string(),
            587,
            "test@gmail.com".to_string(),
            "Test".to_string(),
        )
        .with_tls(true)
        .with_credentials("user".to_string(), "pass".to_string());

        assert!(config.use_tls);
        assert_eq!(config.username, Some("user".to_string()));
        assert_eq!(config.password, Some("pass".to_string()));
    }

    #[tokio::test]
    async fn test_build_message_rejects_invalid_recipient() {
        let sender = SmtpSender::new(SmtpConfig::new(
            "localhost".into(),
            1025,
            "noreply@localhost".into(),
            "Dev".into(),
        ))
        .unwrap();

        assert!(sender.build_message("a@b.com", "Hi", "body").is_ok());
        assert!(matches!(
            sender.build_message("not an address", "Hi", "body"),
            Err(NotificationError::InvalidEmail(_))
        ));
    }
}
