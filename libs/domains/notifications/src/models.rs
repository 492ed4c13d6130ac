//! Data models for the notifications domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

/// Notification kinds the processor knows how to deliver.
///
/// The wire tag is a free-form string; anything that does not parse into a
/// kind is acknowledged and dropped by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum NotificationKind {
    /// Sent after a successful registration.
    #[strum(to_string = "welcome", serialize = "Welcome-email")]
    Welcome,
}

/// Recipient of a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: String,
    pub email: String,
    pub name: String,
}

impl Recipient {
    pub fn new(
        user_id: impl Into<String>,
        email: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            name: name.into(),
        }
    }
}

/// Optional originator of a notification (e.g. the user who triggered it).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sender {
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Notification request as it travels on the broker.
///
/// Field names match the JSON wire format. `from` and `fromName` are always
/// present and serialize as `null` when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "userEmail")]
    pub user_email: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    pub message: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(rename = "fromName", default)]
    pub from_name: Option<String>,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
}

impl NotificationPayload {
    pub fn new(
        kind: impl Into<String>,
        recipient: Recipient,
        message: impl Into<String>,
        sender: Sender,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: kind.into(),
            user_id: recipient.user_id,
            user_email: recipient.email,
            user_name: recipient.name,
            message: message.into(),
            from: sender.email,
            from_name: sender.name,
            timestamp,
        }
    }

    /// Parsed kind, `None` for tags this service does not handle.
    pub fn notification_kind(&self) -> Option<NotificationKind> {
        self.kind.parse().ok()
    }

    /// Broker message id: `notify_<epoch-millis>_<userId>`.
    pub fn message_id(&self) -> String {
        format!("notify_{}_{}", self.timestamp.timestamp_millis(), self.user_id)
    }
}

/// Reads the `type` tag of a raw request without decoding anything else.
///
/// Returns `None` when the tag is missing or not a known kind.
pub fn kind_of(request: &Value) -> Option<NotificationKind> {
    request.get("type")?.as_str()?.parse().ok()
}

/// Welcome request as the worker reads it.
///
/// Only the fields the email uses are required; `userId` is kept for logging.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WelcomeRequest {
    #[serde(rename = "userId", default)]
    pub user_id: String,
    #[serde(rename = "userEmail")]
    pub user_email: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    pub message: String,
}

/// ISO-8601 UTC timestamps with millisecond precision (`2024-05-01T10:00:00.000Z`).
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
