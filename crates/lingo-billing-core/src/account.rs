//! Billing accounts and the subscription state machine.
//!
//! A [`BillingAccount`] is the per-user billing record. It embeds the user's
//! [`Subscription`] and the provider identifiers billing has seen for them.
//! Every subscription status change goes through [`SubscriptionStatus::apply`].

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::event::PaymentProvider;
use crate::plan::{Plan, PLAN_CURRENCY};
use crate::promo::PromoCodeKey;
use crate::UserId;

/// Days before `end_date` at which an expiry reminder is sent.
pub const EXPIRY_REMINDER_DAYS: i64 = 7;

/// Return the instant one calendar month after `t`.
#[must_use]
pub fn one_month_after(t: DateTime<Utc>) -> DateTime<Utc> {
    t.checked_add_months(Months::new(1))
        .unwrap_or(t + Duration::days(30))
}

// ============================================================================
// Status & transitions
// ============================================================================

/// Status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Trial period, not yet paid.
    Trialing,

    /// Paid and current.
    Active,

    /// A renewal payment failed.
    PastDue,

    /// Canceled; remains usable until `end_date`.
    Canceled,

    /// Lapsed.
    Expired,
}

impl SubscriptionStatus {
    /// Lower-case name used in storage and APIs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
        }
    }

    /// Map a provider-reported status string, case-insensitively.
    ///
    /// Returns `None` for statuses billing does not model (e.g. `paused`).
    #[must_use]
    pub fn from_provider(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "trialing" => Some(Self::Trialing),
            "active" => Some(Self::Active),
            "past_due" => Some(Self::PastDue),
            "canceled" | "cancelled" => Some(Self::Canceled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Compute the status after `transition` from `current`
    /// (`None` = no subscription yet).
    ///
    /// This is the only place subscription status rules live.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for any combination not allowed.
    pub fn apply(
        current: Option<Self>,
        transition: Transition,
    ) -> Result<StatusChange, InvalidTransition> {
        use SubscriptionStatus::{Active, Canceled, Expired, PastDue, Trialing};

        let change = |to, starts_new_subscription| StatusChange {
            from: current,
            to,
            starts_new_subscription,
        };

        let result = match (transition, current) {
            (Transition::PaymentSucceeded, None | Some(Canceled | Expired)) => {
                Some(change(Active, true))
            }
            (Transition::PaymentSucceeded, Some(Trialing | Active | PastDue))
            | (Transition::StatusReported(Active), Some(Trialing | Active | PastDue)) => {
                Some(change(Active, false))
            }
            (
                Transition::PaymentFailed | Transition::StatusReported(PastDue),
                Some(Active | PastDue),
            ) => Some(change(PastDue, false)),
            (
                Transition::Canceled | Transition::StatusReported(Canceled),
                Some(Trialing | Active | PastDue | Canceled),
            ) => Some(change(Canceled, false)),
            (Transition::StatusReported(Trialing), None) => Some(change(Trialing, true)),
            (Transition::StatusReported(Trialing), Some(Trialing)) => {
                Some(change(Trialing, false))
            }
            (
                Transition::Expire | Transition::StatusReported(Expired),
                Some(Trialing | Active | PastDue | Canceled),
            ) => Some(change(Expired, false)),
            _ => None,
        };

        result.ok_or(InvalidTransition {
            from: current,
            transition,
        })
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An input to the subscription state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A payment for the subscription succeeded.
    PaymentSucceeded,
    /// A payment for the subscription failed.
    PaymentFailed,
    /// The subscription was canceled.
    Canceled,
    /// The provider reported a status directly.
    StatusReported(SubscriptionStatus),
    /// The paid period lapsed.
    Expire,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PaymentSucceeded => f.write_str("payment_succeeded"),
            Self::PaymentFailed => f.write_str("payment_failed"),
            Self::Canceled => f.write_str("canceled"),
            Self::StatusReported(status) => write!(f, "status_reported({status})"),
            Self::Expire => f.write_str("expire"),
        }
    }
}

/// A permitted status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    /// Status before the transition.
    pub from: Option<SubscriptionStatus>,
    /// Status after the transition.
    pub to: SubscriptionStatus,
    /// Whether a fresh subscription record replaces the old one.
    pub starts_new_subscription: bool,
}

/// A transition the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid subscription transition {transition} from {}", .from.map_or("none", SubscriptionStatus::as_str))]
pub struct InvalidTransition {
    /// Status before the attempted transition.
    pub from: Option<SubscriptionStatus>,
    /// The rejected transition.
    pub transition: Transition,
}

// ============================================================================
// Subscription
// ============================================================================

/// A subscription to a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// The subscribed plan.
    pub plan: Plan,

    /// Current status.
    pub status: SubscriptionStatus,

    /// When this subscription record started.
    pub start_date: DateTime<Utc>,

    /// End of the paid period. Only moves forward, only on payment.
    pub end_date: DateTime<Utc>,

    /// Whether the subscription ends at `end_date` instead of renewing.
    pub cancel_at_period_end: bool,

    /// Discount applied to the last payment.
    pub discount_percentage: u8,

    /// Promo code applied to the last payment, if known.
    pub applied_promo_code: Option<PromoCodeKey>,

    /// Last amount paid, in minor units of `currency`.
    pub amount_cents: i64,

    /// Currency of `amount_cents`.
    pub currency: String,
}

impl Subscription {
    /// Whether the subscription grants access at `now`.
    #[must_use]
    pub fn grants_access(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SubscriptionStatus::Active | SubscriptionStatus::Trialing => true,
            SubscriptionStatus::PastDue | SubscriptionStatus::Canceled => now <= self.end_date,
            SubscriptionStatus::Expired => false,
        }
    }
}

/// Details of a successful payment, as applied to an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentApplied {
    /// Plan paid for.
    pub plan: Plan,
    /// Amount paid in minor units.
    pub amount_cents: i64,
    /// Currency of the amount.
    pub currency: String,
    /// Discount granted.
    pub discount_percentage: u8,
}

// ============================================================================
// Account
// ============================================================================

/// Provider identifiers billing has seen for a user. Opaque to billing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRefs {
    /// Provider that last reported on this account.
    pub provider: Option<PaymentProvider>,

    /// Provider customer id.
    pub customer_id: Option<String>,

    /// Provider subscription id.
    pub subscription_id: Option<String>,

    /// Last provider transaction id.
    pub last_transaction_id: Option<String>,
}

/// The promo code most recently redeemed by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPromoCode {
    /// The code.
    pub code: PromoCodeKey,
    /// Discount granted.
    pub discount_percentage: u8,
    /// When it was redeemed.
    pub applied_at: DateTime<Utc>,
}

/// The per-user billing record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingAccount {
    /// The user (auth provider `sub`).
    pub user_id: UserId,

    /// Email, when known (used for billing emails).
    pub email: Option<String>,

    /// Display name, when known.
    pub name: Option<String>,

    /// Current subscription, if any.
    pub subscription: Option<Subscription>,

    /// Provider identifiers.
    pub provider_refs: ProviderRefs,

    /// Promo code most recently redeemed.
    pub applied_promo: Option<AppliedPromoCode>,

    /// `occurred_at` of the newest applied status-changing event.
    pub last_event_at: Option<DateTime<Utc>>,

    /// Optimistic concurrency counter, bumped by the store on every write.
    pub version: u64,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl BillingAccount {
    /// Create an empty account.
    #[must_use]
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            email: None,
            name: None,
            subscription: None,
            provider_refs: ProviderRefs::default(),
            applied_promo: None,
            last_event_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Current subscription status, `None` without a subscription.
    #[must_use]
    pub fn status(&self) -> Option<SubscriptionStatus> {
        self.subscription.as_ref().map(|s| s.status)
    }

    /// Current plan, if subscribed.
    #[must_use]
    pub fn current_plan(&self) -> Option<Plan> {
        self.subscription.as_ref().map(|s| s.plan)
    }

    /// Whether the account has an active subscription.
    #[must_use]
    pub fn has_active_subscription(&self) -> bool {
        self.status() == Some(SubscriptionStatus::Active)
    }

    /// Whether an event that occurred at `occurred_at` predates the last
    /// applied status change.
    #[must_use]
    pub fn is_stale(&self, occurred_at: DateTime<Utc>) -> bool {
        self.last_event_at.is_some_and(|last| occurred_at < last)
    }

    /// Apply a successful payment: activate and extend the paid period to
    /// `max(end_date, now + 1 month)`.
    ///
    /// A payment on a canceled or expired subscription (or on none) starts a
    /// fresh subscription record.
    ///
    /// # Errors
    ///
    /// Never fails in practice (every state accepts a payment), but returns
    /// the state machine's verdict for uniformity.
    pub fn apply_payment(
        &mut self,
        payment: PaymentApplied,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, InvalidTransition> {
        let change = SubscriptionStatus::apply(self.status(), Transition::PaymentSucceeded)?;
        let next_end = one_month_after(now);

        let applied_promo_code = self
            .applied_promo
            .as_ref()
            .filter(|promo| promo.discount_percentage == payment.discount_percentage)
            .map(|promo| promo.code.clone());

        match self.subscription.as_mut() {
            Some(sub) if !change.starts_new_subscription => {
                sub.plan = payment.plan;
                sub.status = change.to;
                sub.end_date = sub.end_date.max(next_end);
                sub.cancel_at_period_end = false;
                sub.discount_percentage = payment.discount_percentage;
                sub.applied_promo_code = applied_promo_code;
                sub.amount_cents = payment.amount_cents;
                sub.currency = payment.currency;
            }
            previous => {
                // Time already paid for on the old record carries over
                let end_date = previous.map_or(next_end, |sub| sub.end_date.max(next_end));
                self.subscription = Some(Subscription {
                    plan: payment.plan,
                    status: change.to,
                    start_date: now,
                    end_date,
                    cancel_at_period_end: false,
                    discount_percentage: payment.discount_percentage,
                    applied_promo_code,
                    amount_cents: payment.amount_cents,
                    currency: payment.currency,
                });
            }
        }
        self.updated_at = now;
        Ok(change)
    }

    /// Apply a payment that predates the newest applied status change.
    ///
    /// The money was captured, so the paid period is extended to
    /// `max(end_date, now + 1 month)`, but status and plan stay as the newer
    /// event left them. Without a live subscription (none, or expired by the
    /// sweep) the payment is applied normally.
    ///
    /// Returns the status change, if any.
    ///
    /// # Errors
    ///
    /// Returns the state machine's verdict when applied normally.
    pub fn apply_late_payment(
        &mut self,
        payment: PaymentApplied,
        now: DateTime<Utc>,
    ) -> Result<Option<StatusChange>, InvalidTransition> {
        match self.subscription.as_mut() {
            Some(sub) if sub.status != SubscriptionStatus::Expired => {
                sub.end_date = sub.end_date.max(one_month_after(now));
                self.updated_at = now;
                Ok(None)
            }
            _ => self.apply_payment(payment, now).map(Some),
        }
    }

    /// Apply a failed payment: move to `past_due`, leave `end_date` alone.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] unless the subscription is active or past due.
    pub fn apply_payment_failure(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, InvalidTransition> {
        self.apply_simple(Transition::PaymentFailed, now)
    }

    /// Cancel the subscription at period end.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if there is nothing to cancel.
    pub fn apply_cancellation(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, InvalidTransition> {
        self.apply_simple(Transition::Canceled, now)
    }

    /// Apply a provider-reported status.
    ///
    /// A reported `trialing` with no subscription starts a trial on `plan`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the report is not allowed from the
    /// current status.
    pub fn apply_reported_status(
        &mut self,
        status: SubscriptionStatus,
        plan: Plan,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, InvalidTransition> {
        let transition = Transition::StatusReported(status);
        let change = SubscriptionStatus::apply(self.status(), transition)?;
        if change.starts_new_subscription {
            self.subscription = Some(Subscription {
                plan,
                status: change.to,
                start_date: now,
                end_date: now,
                cancel_at_period_end: false,
                discount_percentage: 0,
                applied_promo_code: None,
                amount_cents: 0,
                currency: PLAN_CURRENCY.to_string(),
            });
            self.updated_at = now;
            return Ok(change);
        }
        self.apply_change(change, now);
        Ok(change)
    }

    /// Mark the subscription expired.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if there is no subscription or it is
    /// already expired.
    pub fn apply_expiry(&mut self, now: DateTime<Utc>) -> Result<StatusChange, InvalidTransition> {
        self.apply_simple(Transition::Expire, now)
    }

    fn apply_simple(
        &mut self,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, InvalidTransition> {
        let change = SubscriptionStatus::apply(self.status(), transition)?;
        self.apply_change(change, now);
        Ok(change)
    }

    fn apply_change(&mut self, change: StatusChange, now: DateTime<Utc>) {
        if let Some(sub) = self.subscription.as_mut() {
            sub.status = change.to;
            match change.to {
                SubscriptionStatus::Canceled => sub.cancel_at_period_end = true,
                SubscriptionStatus::Active => sub.cancel_at_period_end = false,
                _ => {}
            }
        }
        self.updated_at = now;
    }
}
