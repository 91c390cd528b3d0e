//! In-app notifications written by billing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{NotificationId, UserId};

/// Link shown on payment failure notifications.
pub const SUBSCRIPTION_SETTINGS_URL: &str = "/settings/subscription";

/// Category of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Subscription and payment updates.
    Subscription,
    /// Platform notices (e.g. admin alerts).
    System,
}

/// A notification addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Identifier (time-ordered).
    pub id: NotificationId,

    /// Recipient.
    pub recipient_id: UserId,

    /// Category.
    pub kind: NotificationKind,

    /// Short title.
    pub title: String,

    /// Message body.
    pub body: String,

    /// Structured context for the client.
    #[serde(default)]
    pub data: serde_json::Value,

    /// Whether the user has read it.
    pub read: bool,

    /// Deep link into the app.
    pub action_url: Option<String>,

    /// When it was created.
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Create an unread notification.
    #[must_use]
    pub fn new(
        recipient_id: UserId,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::generate(),
            recipient_id,
            kind,
            title: title.into(),
            body: body.into(),
            data: serde_json::Value::Null,
            read: false,
            action_url: None,
            created_at: now,
        }
    }

    /// Attach structured data.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Attach a deep link.
    #[must_use]
    pub fn with_action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }
}
