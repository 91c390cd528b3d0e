//! Subscription plans and their list prices.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::pricing::discounted_price;

// ============================================================================
// Constants
// ============================================================================

/// Basic plan monthly price in cents ($29).
pub const BASIC_PLAN_PRICE_CENTS: i64 = 2900;

/// Premium plan monthly price in cents ($49).
pub const PREMIUM_PLAN_PRICE_CENTS: i64 = 4900;

/// Enterprise plan monthly price in cents ($99).
pub const ENTERPRISE_PLAN_PRICE_CENTS: i64 = 9900;

/// Currency all list prices are quoted in.
pub const PLAN_CURRENCY: &str = "USD";

/// Available subscription plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// Basic plan: $29/month.
    Basic,

    /// Premium plan: $49/month.
    Premium,

    /// Enterprise plan: $99/month.
    Enterprise,
}

impl Plan {
    /// All plans, cheapest first.
    pub const ALL: [Self; 3] = [Self::Basic, Self::Premium, Self::Enterprise];

    /// Get the monthly list price in cents.
    #[must_use]
    pub const fn monthly_price_cents(self) -> i64 {
        match self {
            Self::Basic => BASIC_PLAN_PRICE_CENTS,
            Self::Premium => PREMIUM_PLAN_PRICE_CENTS,
            Self::Enterprise => ENTERPRISE_PLAN_PRICE_CENTS,
        }
    }

    /// Lower-case name used in storage, APIs, and provider metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Premium => "premium",
            Self::Enterprise => "enterprise",
        }
    }

    /// Human-readable name for notifications and emails.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Basic => "Basic",
            Self::Premium => "Premium",
            Self::Enterprise => "Enterprise",
        }
    }

    /// Infer the plan a charge paid for from its amount in cents.
    ///
    /// Used when a provider does not echo the plan back in its metadata.
    #[must_use]
    pub fn from_paid_amount_cents(amount_cents: i64) -> Self {
        if amount_cents >= ENTERPRISE_PLAN_PRICE_CENTS {
            Self::Enterprise
        } else if amount_cents >= PREMIUM_PLAN_PRICE_CENTS {
            Self::Premium
        } else {
            Self::Basic
        }
    }

    /// Infer the plan from an amount paid with `discount_percentage` off.
    ///
    /// An exact match on a plan's discounted price wins; otherwise the
    /// amount is scaled back to list price and classified by
    /// [`Plan::from_paid_amount_cents`].
    #[must_use]
    pub fn from_discounted_amount_cents(amount_cents: i64, discount_percentage: u8) -> Self {
        let exact = Self::ALL.into_iter().find(|plan| {
            discounted_price(plan.monthly_price_cents(), discount_percentage).final_cents
                == amount_cents
        });
        exact.unwrap_or_else(|| {
            let remaining = 100 - i64::from(discount_percentage.min(100));
            let list = if remaining == 0 {
                amount_cents
            } else {
                amount_cents * 100 / remaining
            };
            Self::from_paid_amount_cents(list)
        })
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = UnknownPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "premium" => Ok(Self::Premium),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(UnknownPlan(s.to_string())),
        }
    }
}

/// A plan name that is not in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown plan: {0}")]
pub struct UnknownPlan(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_prices() {
        assert_eq!(Plan::Basic.monthly_price_cents(), 2900);
        assert_eq!(Plan::Premium.monthly_price_cents(), 4900);
        assert_eq!(Plan::Enterprise.monthly_price_cents(), 9900);
    }

    #[test]
    fn plan_parse_is_case_insensitive() {
        assert_eq!("Premium".parse::<Plan>().unwrap(), Plan::Premium);
        assert_eq!(" basic ".parse::<Plan>().unwrap(), Plan::Basic);
        assert!("gold".parse::<Plan>().is_err());
    }

    #[test]
    fn plan_inferred_from_amount() {
        assert_eq!(Plan::from_paid_amount_cents(9900), Plan::Enterprise);
        assert_eq!(Plan::from_paid_amount_cents(4900), Plan::Premium);
        assert_eq!(Plan::from_paid_amount_cents(5000), Plan::Premium);
        assert_eq!(Plan::from_paid_amount_cents(2900), Plan::Basic);
        assert_eq!(Plan::from_paid_amount_cents(100), Plan::Basic);
    }

    #[test]
    fn plan_inferred_from_discounted_amount() {
        assert_eq!(Plan::from_discounted_amount_cents(3920, 20), Plan::Premium);
        assert_eq!(Plan::from_discounted_amount_cents(7920, 20), Plan::Enterprise);
        assert_eq!(Plan::from_discounted_amount_cents(2900, 0), Plan::Basic);
        // Tax on top of a discounted price still lands on the right plan
        assert_eq!(Plan::from_discounted_amount_cents(4300, 20), Plan::Premium);
        assert_eq!(Plan::from_discounted_amount_cents(0, 100), Plan::Basic);
    }

    #[test]
    fn plan_serde_snake_case() {
        assert_eq!(serde_json::to_string(&Plan::Enterprise).unwrap(), "\"enterprise\"");
    }
}
