//! Core billing types for the lingo learning platform.
//!
//! This crate provides the domain types shared by the store and the service:
//!
//! - **Identifiers**: `UserId`, `UsageId`, `PaymentId`, `NotificationId`
//! - **Plans & pricing**: `Plan`, `discounted_price`
//! - **Promo codes**: `PromoCode`, `PromoCodeKey`, `PromoCodeUsage`, `PromoCodeRejection`
//! - **Accounts**: `BillingAccount`, `Subscription`, `SubscriptionStatus`, `Transition`
//! - **Events**: `BillingEvent`, `BillingEventKind`, `PaymentProvider`
//! - **Records**: `PaymentHistoryRecord`, `ProcessedEvent`, `Notification`
//!
//! # Money
//!
//! Amounts are `i64` minor units (cents for USD) to avoid floating point
//! precision issues. Discounts are whole percentages rounded half-up to the cent.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod error;
pub mod event;
pub mod history;
pub mod ids;
pub mod notification;
pub mod plan;
pub mod pricing;
pub mod promo;

pub use account::{
    one_month_after, AppliedPromoCode, BillingAccount, InvalidTransition, PaymentApplied,
    ProviderRefs, StatusChange, Subscription, SubscriptionStatus, Transition,
    EXPIRY_REMINDER_DAYS,
};
pub use error::{BillingError, Result};
pub use event::{BillingEvent, BillingEventKind, PaymentProvider};
pub use history::{EventDisposition, PaymentHistoryRecord, PaymentStatus, ProcessedEvent};
pub use ids::{IdError, NotificationId, PaymentId, UsageId, UserId};
pub use notification::{Notification, NotificationKind, SUBSCRIPTION_SETTINGS_URL};
pub use plan::{Plan, UnknownPlan, PLAN_CURRENCY};
pub use pricing::{
    currency_decimals, discount_cents, discounted_price, format_amount, DiscountedPrice,
};
pub use promo::{
    NewPromoCode, PromoCode, PromoCodeError, PromoCodeKey, PromoCodeRejection, PromoCodeStats,
    PromoCodeUpdate, PromoCodeUsage, PromoCodeValidation,
};
