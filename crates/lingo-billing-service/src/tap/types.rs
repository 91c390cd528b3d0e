//! Tap Payments charge webhook types.

use serde::Deserialize;

/// A Tap charge object, as posted to the webhook URL.
#[derive(Debug, Clone, Deserialize)]
pub struct Charge {
    /// Charge ID (`chg_...`).
    pub id: String,
    /// Object type; `charge` for charge webhooks.
    #[serde(default)]
    pub object: Option<String>,
    /// Charge status, e.g. `CAPTURED`, `FAILED`, `DECLINED`.
    pub status: String,
    /// Amount in major units.
    pub amount: f64,
    /// ISO currency code.
    pub currency: String,
    /// Paying customer.
    #[serde(default)]
    pub customer: Option<ChargeCustomer>,
    /// Receipt details.
    #[serde(default)]
    pub receipt: Option<ChargeReceipt>,
    /// Gateway and payment references.
    #[serde(default)]
    pub reference: Option<ChargeReference>,
    /// Transaction timing.
    #[serde(default)]
    pub transaction: Option<ChargeTransaction>,
    /// Metadata set when the charge was created.
    #[serde(default)]
    pub metadata: Option<ChargeMetadata>,
}

/// Customer attached to a charge.
#[derive(Debug, Clone, Deserialize)]
pub struct ChargeCustomer {
    /// Tap customer ID (`cus_...`).
    #[serde(default)]
    pub id: Option<String>,
}

/// Receipt attached to a charge.
#[derive(Debug, Clone, Deserialize)]
pub struct ChargeReceipt {
    /// Hosted receipt link.
    #[serde(default)]
    pub url: Option<String>,
}

/// Charge references used in the webhook hash.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChargeReference {
    /// Gateway reference.
    #[serde(default)]
    pub gateway: Option<String>,
    /// Payment reference.
    #[serde(default)]
    pub payment: Option<String>,
}

/// Charge transaction details.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChargeTransaction {
    /// Creation time in epoch milliseconds (string or number).
    #[serde(default)]
    pub created: Option<serde_json::Value>,
}

/// Checkout metadata set by the frontend.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeMetadata {
    /// Our user ID.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Plan name.
    #[serde(default)]
    pub plan: Option<String>,
    /// Promo discount applied at checkout.
    #[serde(default)]
    pub discount_percentage: Option<serde_json::Value>,
}
