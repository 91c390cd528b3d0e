//! Lingo Billing HTTP API Service.
//!
//! This crate provides the HTTP API for lingo billing, including:
//!
//! - Promo code validation, redemption and administration
//! - Subscription status and payment history
//! - Paddle and Tap payment webhooks
//! - In-app billing notifications and EmailJS emails
//!
//! # Authentication
//!
//! The service supports two authentication methods:
//!
//! 1. **Identity JWT tokens** - For student requests
//! 2. **Admin API key** - For promo code management and maintenance

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers need async for axum

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod paddle;
pub mod promo;
pub mod reconciler;
pub mod routes;
pub mod state;
pub mod tap;

pub use config::{EmailJsConfig, ServiceConfig};
pub use error::{ApiError, WebhookError};
pub use mailer::{EmailJsMailer, EmailKind, EmailMessage, Mailer, MailerError};
pub use promo::{PromoCodeEngine, PromoError, Redeemer, Redemption};
pub use reconciler::{ExpirySummary, ReconcileOutcome, SubscriptionReconciler};
pub use routes::create_router;
pub use state::AppState;
