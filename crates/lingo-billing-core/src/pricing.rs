//! Discount arithmetic.
//!
//! All amounts are integer cents. Percentages are whole numbers in `0..=100`.
//! The discount is rounded half-up to the nearest cent, so a 15% discount on
//! $29.00 is $4.35 and on $0.10 is $0.02 (1.5 cents rounds up).

use serde::{Deserialize, Serialize};

/// A price before and after a percentage discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountedPrice {
    /// List price in cents.
    pub original_cents: i64,
    /// Discount amount in cents.
    pub discount_cents: i64,
    /// Price to charge in cents.
    pub final_cents: i64,
    /// Discount percentage applied.
    pub discount_percentage: u8,
}

/// Compute the discount amount for `original_cents` at `percentage`.
///
/// Percentages above 100 are clamped to 100; negative amounts yield zero.
#[must_use]
pub fn discount_cents(original_cents: i64, percentage: u8) -> i64 {
    if original_cents <= 0 {
        return 0;
    }
    let pct = i64::from(percentage.min(100));
    (original_cents * pct + 50) / 100
}

/// Apply a percentage discount to a list price.
#[must_use]
pub fn discounted_price(original_cents: i64, percentage: u8) -> DiscountedPrice {
    let discount = discount_cents(original_cents, percentage);
    DiscountedPrice {
        original_cents,
        discount_cents: discount,
        final_cents: original_cents - discount,
        discount_percentage: percentage.min(100),
    }
}

/// Number of minor-unit digits for an ISO currency code.
///
/// Gulf dinars use three; yen uses none; everything else uses two.
#[must_use]
pub fn currency_decimals(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "KWD" | "BHD" | "OMR" | "JOD" => 3,
        "JPY" => 0,
        _ => 2,
    }
}

/// Format a minor-unit amount for display, e.g. `49.00 USD`.
#[must_use]
pub fn format_amount(minor_units: i64, currency: &str) -> String {
    let currency = currency.to_ascii_uppercase();
    let decimals = currency_decimals(&currency);
    if decimals == 0 {
        return format!("{minor_units} {currency}");
    }
    let scale = 10_u64.pow(decimals);
    let sign = if minor_units < 0 { "-" } else { "" };
    let abs = minor_units.unsigned_abs();
    format!(
        "{sign}{}.{:0width$} {currency}",
        abs / scale,
        abs % scale,
        width = decimals as usize
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twenty_percent_off_premium() {
        let price = discounted_price(4900, 20);
        assert_eq!(price.discount_cents, 980);
        assert_eq!(price.final_cents, 3920);
    }

    #[test]
    fn rounds_half_up_to_the_cent() {
        assert_eq!(discount_cents(10, 15), 2);
        assert_eq!(discount_cents(2900, 15), 435);
        assert_eq!(discount_cents(9900, 33), 3267);
        assert_eq!(discount_cents(1, 49), 0);
        assert_eq!(discount_cents(1, 50), 1);
    }

    #[test]
    fn full_discount_is_free() {
        assert_eq!(discounted_price(9900, 100).final_cents, 0);
        assert_eq!(discounted_price(9900, 250).final_cents, 0);
    }

    #[test]
    fn zero_and_negative_amounts() {
        assert_eq!(discounted_price(0, 20).final_cents, 0);
        assert_eq!(discount_cents(-100, 20), 0);
    }

    #[test]
    fn formats_by_currency_precision() {
        assert_eq!(format_amount(4900, "usd"), "49.00 USD");
        assert_eq!(format_amount(12_345, "KWD"), "12.345 KWD");
        assert_eq!(format_amount(500, "JPY"), "500 JPY");
        assert_eq!(format_amount(-5, "USD"), "-0.05 USD");
    }
}
