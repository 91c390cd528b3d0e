//! Tap Payments webhook adapter.
//!
//! Tap posts the charge object itself and signs a canonical string built
//! from selected fields, sent hex-encoded in the `hashstring` header.

pub mod types;

pub use types::*;

use chrono::{DateTime, Utc};

use lingo_billing_core::{
    currency_decimals, BillingEvent, BillingEventKind, PaymentProvider, Plan, UserId,
};

use crate::crypto::verify_hmac_sha256_hex;
use crate::error::WebhookError;
use crate::paddle::parse_percentage;

/// Header carrying the Tap signature.
pub const SIGNATURE_HEADER: &str = "hashstring";

/// Parse the raw webhook body.
///
/// # Errors
///
/// Returns `MalformedEnvelope` if the body is not a charge object.
pub fn parse_charge(body: &str) -> Result<Charge, WebhookError> {
    serde_json::from_str(body).map_err(|e| WebhookError::MalformedEnvelope(e.to_string()))
}

/// The string Tap signs for a charge.
#[must_use]
pub fn hash_string(charge: &Charge) -> String {
    let decimals = currency_decimals(&charge.currency) as usize;
    let reference = charge.reference.clone().unwrap_or_default();
    let created = charge
        .transaction
        .as_ref()
        .and_then(|t| t.created.as_ref())
        .map(value_to_plain_string)
        .unwrap_or_default();

    format!(
        "x_id{}x_amount{:.*}x_currency{}x_gateway_reference{}x_payment_reference{}x_status{}x_created{}",
        charge.id,
        decimals,
        charge.amount,
        charge.currency,
        reference.gateway.unwrap_or_default(),
        reference.payment.unwrap_or_default(),
        charge.status,
        created,
    )
}

/// Verify the `hashstring` header for a parsed charge.
///
/// # Errors
///
/// Returns `MissingSignature` or `InvalidSignature`.
pub fn verify_hashstring(
    secret: &str,
    header: Option<&str>,
    charge: &Charge,
) -> Result<(), WebhookError> {
    let signature = header.ok_or(WebhookError::MissingSignature)?;
    if verify_hmac_sha256_hex(secret, &hash_string(charge), signature) {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature)
    }
}

/// Translate a charge into a billing event.
///
/// Returns `Ok(None)` for statuses billing does not act on (e.g. `INITIATED`).
/// `received_at` is used when the charge carries no creation time.
///
/// # Errors
///
/// Returns `InvalidPayload` for a negative amount or unknown plan.
pub fn charge_event(
    charge: Charge,
    received_at: DateTime<Utc>,
) -> Result<Option<BillingEvent>, WebhookError> {
    if charge.object.as_deref().is_some_and(|o| o != "charge") {
        tracing::debug!(object = ?charge.object, "Unhandled Tap object");
        return Ok(None);
    }

    let status = charge.status.to_ascii_uppercase();
    let amount_cents = to_minor_units(charge.amount, &charge.currency)?;
    let currency = charge.currency.to_ascii_uppercase();
    let metadata = charge.metadata.clone().unwrap_or_default();

    let kind = match status.as_str() {
        "CAPTURED" => {
            let discount_percentage = parse_percentage(metadata.discount_percentage.as_ref());
            let plan = match metadata.plan.as_deref() {
                Some(name) => name
                    .parse::<Plan>()
                    .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?,
                None => Plan::from_discounted_amount_cents(amount_cents, discount_percentage),
            };
            BillingEventKind::PaymentCompleted {
                customer_id: charge.customer.as_ref().and_then(|c| c.id.clone()),
                transaction_id: charge.id.clone(),
                plan,
                amount_cents,
                currency,
                discount_percentage,
                receipt_url: charge.receipt.as_ref().and_then(|r| r.url.clone()),
            }
        }
        // Abandoned, cancelled and timed-out checkouts never charged an existing subscriber
        "FAILED" | "DECLINED" => {
            BillingEventKind::PaymentFailed {
                transaction_id: Some(charge.id.clone()),
                amount_cents: Some(amount_cents),
                currency: Some(currency),
            }
        }
        other => {
            tracing::debug!(charge_id = %charge.id, status = %other, "Unhandled Tap charge status");
            return Ok(None);
        }
    };

    let user_id = metadata.user_id.as_deref().and_then(|raw| {
        raw.parse::<UserId>()
            .map_err(|e| tracing::warn!(user_id = %raw, error = %e, "Invalid userId in Tap metadata"))
            .ok()
    });

    let occurred_at = charge
        .transaction
        .as_ref()
        .and_then(|t| t.created.as_ref())
        .and_then(|v| value_to_plain_string(v).parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(received_at);

    Ok(Some(BillingEvent {
        // A charge moves through several statuses under one id
        event_id: format!("{}:{status}", charge.id),
        provider: PaymentProvider::Tap,
        occurred_at,
        user_id,
        kind,
    }))
}

#[allow(clippy::cast_possible_truncation)]
fn to_minor_units(amount: f64, currency: &str) -> Result<i64, WebhookError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(WebhookError::InvalidPayload(format!("invalid amount: {amount}")));
    }
    let scale = 10_f64.powi(i32::try_from(currency_decimals(currency)).unwrap_or(2));
    Ok((amount * scale).round() as i64)
}

fn value_to_plain_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hmac_sha256_hex;
    use serde_json::json;

    const SECRET: &str = "sk_test_tap";

    fn charge_json(status: &str, amount: f64, currency: &str) -> String {
        json!({
            "id": "chg_TS01",
            "object": "charge",
            "status": status,
            "amount": amount,
            "currency": currency,
            "customer": {"id": "cus_01"},
            "receipt": {"url": "https://tap.company/receipt/chg_TS01"},
            "reference": {"gateway": "gw_1", "payment": "pay_1"},
            "transaction": {"created": "1772359200000"},
            "metadata": {"userId": "u1", "discountPercentage": 20}
        })
        .to_string()
    }

    #[test]
    fn hash_string_formats_amount_by_currency() {
        let charge = parse_charge(&charge_json("CAPTURED", 49.0, "USD")).unwrap();
        assert_eq!(
            hash_string(&charge),
            "x_idchg_TS01x_amount49.00x_currencyUSDx_gateway_referencegw_1\
             x_payment_referencepay_1x_statusCAPTUREDx_created1772359200000"
        );

        let kwd = parse_charge(&charge_json("CAPTURED", 15.5, "KWD")).unwrap();
        assert!(hash_string(&kwd).contains("x_amount15.500x_currency"));
    }

    #[test]
    fn verifies_hashstring() {
        let charge = parse_charge(&charge_json("CAPTURED", 49.0, "USD")).unwrap();
        let sig = hmac_sha256_hex(SECRET, &hash_string(&charge));
        assert!(verify_hashstring(SECRET, Some(&sig), &charge).is_ok());
        assert!(matches!(
            verify_hashstring("wrong", Some(&sig), &charge),
            Err(WebhookError::InvalidSignature)
        ));
        assert!(matches!(
            verify_hashstring(SECRET, None, &charge),
            Err(WebhookError::MissingSignature)
        ));
    }

    #[test]
    fn captured_charge_infers_plan_from_amount() {
        let charge = parse_charge(&charge_json("CAPTURED", 49.0, "USD")).unwrap();
        let event = charge_event(charge, Utc::now()).unwrap().unwrap();

        assert_eq!(event.event_id, "chg_TS01:CAPTURED");
        assert_eq!(event.dedupe_key(), "tap:chg_TS01:CAPTURED");
        assert_eq!(event.occurred_at.timestamp_millis(), 1_772_359_200_000);
        assert_eq!(
            event.kind,
            BillingEventKind::PaymentCompleted {
                customer_id: Some("cus_01".into()),
                transaction_id: "chg_TS01".into(),
                plan: Plan::Premium,
                amount_cents: 4900,
                currency: "USD".into(),
                discount_percentage: 20,
                receipt_url: Some("https://tap.company/receipt/chg_TS01".into()),
            }
        );
    }

    #[test]
    fn declined_charge_is_a_failure() {
        let charge = parse_charge(&charge_json("DECLINED", 29.0, "USD")).unwrap();
        let event = charge_event(charge, Utc::now()).unwrap().unwrap();
        assert_eq!(
            event.kind,
            BillingEventKind::PaymentFailed {
                transaction_id: Some("chg_TS01".into()),
                amount_cents: Some(2900),
                currency: Some("USD".into()),
            }
        );
    }

    #[test]
    fn unfinished_checkouts_are_ignored() {
        for status in ["INITIATED", "ABANDONED", "CANCELLED", "TIMEDOUT"] {
            let charge = parse_charge(&charge_json(status, 29.0, "USD")).unwrap();
            assert!(
                charge_event(charge, Utc::now()).unwrap().is_none(),
                "{status} should be ignored"
            );
        }
    }

    #[test]
    fn minor_unit_conversion_rounds() {
        assert_eq!(to_minor_units(29.99, "USD").unwrap(), 2999);
        assert_eq!(to_minor_units(15.5, "KWD").unwrap(), 15_500);
        assert_eq!(to_minor_units(500.0, "JPY").unwrap(), 500);
        assert!(to_minor_units(-1.0, "USD").is_err());
    }
}
