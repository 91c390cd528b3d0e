//! Provider-agnostic billing events.
//!
//! Webhook adapters translate each provider's payload into a [`BillingEvent`];
//! the reconciler only ever sees this type. Internal sources (test-mode
//! activation, the expiry sweep) raise events with [`PaymentProvider::Manual`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::UserId;
use crate::plan::Plan;

/// Where a billing event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    /// Paddle Billing webhooks.
    Paddle,
    /// Tap Payments charge webhooks.
    Tap,
    /// Raised internally (test-mode activation, expiry sweep).
    Manual,
}

impl PaymentProvider {
    /// Lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Paddle => "paddle",
            Self::Tap => "tap",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized billing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingEvent {
    /// Provider-assigned event id, unique per provider. Used for deduplication.
    pub event_id: String,

    /// Originating provider.
    pub provider: PaymentProvider,

    /// When the provider says the event happened.
    pub occurred_at: DateTime<Utc>,

    /// The user the event is attributed to, from provider metadata.
    pub user_id: Option<UserId>,

    /// What happened.
    pub kind: BillingEventKind,
}

impl BillingEvent {
    /// Key used for idempotency receipts: `{provider}:{event_id}`.
    #[must_use]
    pub fn dedupe_key(&self) -> String {
        format!("{}:{}", self.provider, self.event_id)
    }
}

/// The payload of a billing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BillingEventKind {
    /// A payment succeeded.
    PaymentCompleted {
        /// Provider customer id.
        customer_id: Option<String>,
        /// Provider transaction id.
        transaction_id: String,
        /// Plan paid for.
        plan: Plan,
        /// Amount charged, in minor units.
        amount_cents: i64,
        /// ISO currency code.
        currency: String,
        /// Promo discount carried in the checkout metadata.
        discount_percentage: u8,
        /// Receipt link, when the provider supplies one.
        receipt_url: Option<String>,
    },

    /// A payment failed.
    PaymentFailed {
        /// Provider transaction id, if any.
        transaction_id: Option<String>,
        /// Amount attempted, in minor units, if known.
        amount_cents: Option<i64>,
        /// ISO currency code, if known.
        currency: Option<String>,
    },

    /// The provider created a subscription.
    SubscriptionCreated {
        /// Provider customer id.
        customer_id: Option<String>,
        /// Provider subscription id.
        subscription_id: String,
    },

    /// The provider reported a subscription status.
    SubscriptionUpdated {
        /// Raw provider status string.
        status: String,
        /// Plan from metadata, if present.
        plan: Option<Plan>,
    },

    /// The provider canceled the subscription.
    SubscriptionCanceled,

    /// The paid period lapsed (raised by the expiry sweep).
    SubscriptionExpired {
        /// `end_date` of the lapsed period.
        period_end: DateTime<Utc>,
    },
}

impl BillingEventKind {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PaymentCompleted { .. } => "payment_completed",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::SubscriptionCreated { .. } => "subscription_created",
            Self::SubscriptionUpdated { .. } => "subscription_updated",
            Self::SubscriptionCanceled => "subscription_canceled",
            Self::SubscriptionExpired { .. } => "subscription_expired",
        }
    }
}
