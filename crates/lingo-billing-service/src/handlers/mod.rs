//! API handlers.

pub mod admin;
pub mod health;
pub mod notifications;
pub mod payments;
pub mod plans;
pub mod promo_codes;
pub mod subscriptions;
pub mod webhooks;
