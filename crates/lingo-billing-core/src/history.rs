//! Payment history and event processing receipts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::PaymentProvider;
use crate::ids::{PaymentId, UserId};

/// Outcome of a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Money was collected.
    Succeeded,
    /// The charge failed.
    Failed,
}

/// An append-only record of one payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentHistoryRecord {
    /// Record identifier (time-ordered).
    pub id: PaymentId,

    /// The paying user.
    pub user_id: UserId,

    /// Provider that processed the payment.
    pub provider: PaymentProvider,

    /// Provider transaction id, if any.
    pub transaction_id: Option<String>,

    /// Amount in minor units, as reported by the provider.
    pub amount_cents: i64,

    /// ISO currency code.
    pub currency: String,

    /// Outcome.
    pub status: PaymentStatus,

    /// Human-readable description, e.g. "Premium subscription".
    pub description: String,

    /// Provider receipt link.
    pub receipt_url: Option<String>,

    /// When the record was written.
    pub created_at: DateTime<Utc>,
}

/// What the reconciler decided for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDisposition {
    /// The event changed state.
    Applied,
    /// The event was older than the last applied change.
    Stale,
    /// The state machine refused the transition.
    Rejected,
    /// The event carried nothing billing acts on.
    Ignored,
}

/// Idempotency receipt for a processed provider event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// `{provider}:{event_id}`.
    pub key: String,

    /// Originating provider.
    pub provider: PaymentProvider,

    /// Attributed user.
    pub user_id: UserId,

    /// Event kind name.
    pub kind: String,

    /// Decision taken.
    pub disposition: EventDisposition,

    /// When the event was processed.
    pub processed_at: DateTime<Utc>,
}
