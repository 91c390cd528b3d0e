//! Paddle Billing webhook adapter.
//!
//! Verifies the `Paddle-Signature` header and translates notifications into
//! [`BillingEvent`]s. Paddle signs `"{ts}:{raw body}"` with HMAC-SHA256 and
//! sends `ts=<unix seconds>;h1=<hex digest>`.

pub mod types;

pub use types::*;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use lingo_billing_core::{
    BillingEvent, BillingEventKind, PaymentProvider, Plan, UnknownPlan, UserId, PLAN_CURRENCY,
};

use crate::crypto::verify_hmac_sha256_hex;
use crate::error::WebhookError;

/// Header carrying the Paddle signature.
pub const SIGNATURE_HEADER: &str = "paddle-signature";

/// Verify a Paddle signature header against the raw body.
///
/// # Errors
///
/// - `MissingSignature` / `MalformedSignature` for an absent or unparsable header.
/// - `TimestampOutOfTolerance` if `ts` is further than `tolerance_seconds` from `now`.
/// - `InvalidSignature` if no `h1` matches.
pub fn verify_signature(
    secret: &str,
    header: Option<&str>,
    body: &str,
    now: DateTime<Utc>,
    tolerance_seconds: i64,
) -> Result<(), WebhookError> {
    let header = header.ok_or(WebhookError::MissingSignature)?;

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(';') {
        match part.trim().split_once('=') {
            Some(("ts", value)) => timestamp = Some(value),
            Some(("h1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let ts = timestamp.ok_or(WebhookError::MalformedSignature)?;
    let ts_seconds: i64 = ts.parse().map_err(|_| WebhookError::MalformedSignature)?;
    if signatures.is_empty() {
        return Err(WebhookError::MalformedSignature);
    }

    let age_seconds = (now.timestamp() - ts_seconds).abs();
    if age_seconds > tolerance_seconds {
        return Err(WebhookError::TimestampOutOfTolerance { age_seconds });
    }

    let signed_payload = format!("{ts}:{body}");
    if signatures
        .iter()
        .any(|sig| verify_hmac_sha256_hex(secret, &signed_payload, sig))
    {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature)
    }
}

/// Parse a Paddle notification into a billing event.
///
/// Returns `Ok(None)` for event types billing does not act on.
///
/// # Errors
///
/// - `MalformedEnvelope` if the body is not a Paddle notification.
/// - `InvalidPayload` if a known event's data cannot be interpreted.
pub fn parse_event(body: &str) -> Result<Option<BillingEvent>, WebhookError> {
    let envelope: PaddleEnvelope =
        serde_json::from_str(body).map_err(|e| WebhookError::MalformedEnvelope(e.to_string()))?;

    let (user_id, kind) = match envelope.event_type.as_str() {
        "transaction.completed" => {
            let txn: Transaction = data(&envelope)?;
            let custom = txn.custom_data.clone().unwrap_or_default();
            let totals = txn
                .details
                .as_ref()
                .and_then(|d| d.totals.as_ref())
                .ok_or_else(|| WebhookError::InvalidPayload("missing details.totals".into()))?;
            let amount_cents = parse_minor_units(&totals.total)?;
            let currency = txn_currency(totals, &txn);
            let discount_percentage = discount(&custom);
            let plan = match custom_plan(&custom)? {
                Some(plan) => plan,
                None => {
                    let inferred =
                        Plan::from_discounted_amount_cents(amount_cents, discount_percentage);
                    tracing::debug!(
                        transaction_id = %txn.id,
                        amount_cents,
                        plan = %inferred,
                        "Paddle transaction has no plan, inferred from amount"
                    );
                    inferred
                }
            };

            (
                custom_user_id(&custom),
                BillingEventKind::PaymentCompleted {
                    customer_id: txn.customer_id,
                    transaction_id: txn.id,
                    plan,
                    amount_cents,
                    currency,
                    discount_percentage,
                    receipt_url: None,
                },
            )
        }
        "transaction.payment_failed" => {
            let txn: Transaction = data(&envelope)?;
            let custom = txn.custom_data.clone().unwrap_or_default();
            let totals = txn.details.as_ref().and_then(|d| d.totals.as_ref());
            let amount_cents = totals.map(|t| parse_minor_units(&t.total)).transpose()?;
            let currency = totals.map(|t| txn_currency(t, &txn));

            (
                custom_user_id(&custom),
                BillingEventKind::PaymentFailed {
                    transaction_id: Some(txn.id),
                    amount_cents,
                    currency,
                },
            )
        }
        "subscription.created" => {
            let sub: Subscription = data(&envelope)?;
            let custom = sub.custom_data.unwrap_or_default();
            (
                custom_user_id(&custom),
                BillingEventKind::SubscriptionCreated {
                    customer_id: sub.customer_id,
                    subscription_id: sub.id,
                },
            )
        }
        "subscription.updated" => {
            let sub: Subscription = data(&envelope)?;
            let custom = sub.custom_data.unwrap_or_default();
            let status = sub
                .status
                .ok_or_else(|| WebhookError::InvalidPayload("missing subscription status".into()))?;
            (
                custom_user_id(&custom),
                BillingEventKind::SubscriptionUpdated {
                    status,
                    plan: custom_plan(&custom)?,
                },
            )
        }
        "subscription.canceled" => {
            let sub: Subscription = data(&envelope)?;
            let custom = sub.custom_data.unwrap_or_default();
            (custom_user_id(&custom), BillingEventKind::SubscriptionCanceled)
        }
        other => {
            tracing::debug!(event_type = %other, "Unhandled Paddle event");
            return Ok(None);
        }
    };

    Ok(Some(BillingEvent {
        event_id: envelope.event_id,
        provider: PaymentProvider::Paddle,
        occurred_at: envelope.occurred_at,
        user_id,
        kind,
    }))
}

fn data<T: DeserializeOwned>(envelope: &PaddleEnvelope) -> Result<T, WebhookError> {
    serde_json::from_value(envelope.data.clone())
        .map_err(|e| WebhookError::InvalidPayload(format!("{}: {e}", envelope.event_type)))
}

fn custom_user_id(custom: &CustomData) -> Option<UserId> {
    let raw = custom.user_id.as_deref()?;
    match raw.parse() {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(user_id = %raw, error = %e, "Invalid userId in Paddle custom_data");
            None
        }
    }
}

fn custom_plan(custom: &CustomData) -> Result<Option<Plan>, WebhookError> {
    custom
        .plan
        .as_deref()
        .map(str::parse::<Plan>)
        .transpose()
        .map_err(|e: UnknownPlan| WebhookError::InvalidPayload(e.to_string()))
}

fn discount(custom: &CustomData) -> u8 {
    parse_percentage(custom.discount_percentage.as_ref())
}

fn txn_currency(totals: &TransactionTotals, txn: &Transaction) -> String {
    totals
        .currency_code
        .clone()
        .or_else(|| txn.currency_code.clone())
        .unwrap_or_else(|| PLAN_CURRENCY.to_string())
        .to_ascii_uppercase()
}

fn parse_minor_units(total: &str) -> Result<i64, WebhookError> {
    total
        .trim()
        .parse()
        .map_err(|_| WebhookError::InvalidPayload(format!("invalid total: {total}")))
}

/// Read a discount percentage sent as a number or numeric string.
///
/// Anything unparsable or out of range counts as no discount.
pub(crate) fn parse_percentage(value: Option<&serde_json::Value>) -> u8 {
    let pct = match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    pct.and_then(|p| u8::try_from(p).ok())
        .filter(|p| *p <= 100)
        .unwrap_or(0)
}
