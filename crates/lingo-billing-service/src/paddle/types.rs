//! Paddle Billing webhook payload types.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Notification envelope wrapping every Paddle event.
#[derive(Debug, Clone, Deserialize)]
pub struct PaddleEnvelope {
    /// Paddle event ID (`evt_...`).
    pub event_id: String,
    /// Event type, e.g. `transaction.completed`.
    pub event_type: String,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
    /// Entity payload; shape depends on `event_type`.
    pub data: serde_json::Value,
}

/// Checkout metadata set by the frontend.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomData {
    /// Our user ID.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Plan name (`basic`, `premium`, `enterprise`).
    #[serde(default)]
    pub plan: Option<String>,
    /// Promo discount applied at checkout. Number or numeric string.
    #[serde(default)]
    pub discount_percentage: Option<serde_json::Value>,
}

/// Paddle transaction entity.
#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    /// Transaction ID (`txn_...`).
    pub id: String,
    /// Customer ID (`ctm_...`).
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Subscription ID, for recurring transactions.
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Currency of the transaction.
    #[serde(default)]
    pub currency_code: Option<String>,
    /// Checkout metadata.
    #[serde(default)]
    pub custom_data: Option<CustomData>,
    /// Calculated totals.
    #[serde(default)]
    pub details: Option<TransactionDetails>,
}

/// Transaction details.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionDetails {
    /// Totals across all line items.
    #[serde(default)]
    pub totals: Option<TransactionTotals>,
}

/// Transaction totals. Paddle sends amounts as strings in minor units.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionTotals {
    /// Grand total in minor units.
    pub total: String,
    /// Currency code.
    #[serde(default)]
    pub currency_code: Option<String>,
}

/// Paddle subscription entity.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    /// Subscription ID (`sub_...`).
    pub id: String,
    /// Paddle status string.
    #[serde(default)]
    pub status: Option<String>,
    /// Customer ID.
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Checkout metadata.
    #[serde(default)]
    pub custom_data: Option<CustomData>,
}
