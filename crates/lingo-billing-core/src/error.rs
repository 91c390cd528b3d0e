//! Error types for lingo billing.

use crate::account::InvalidTransition;
use crate::ids::IdError;
use crate::plan::UnknownPlan;
use crate::promo::PromoCodeError;

/// Result type for billing operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in billing operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Billing account not found.
    #[error("account not found: {user_id}")]
    AccountNotFound {
        /// The user ID that was not found.
        user_id: String,
    },

    /// Promo code not found.
    #[error("promo code not found: {code}")]
    PromoCodeNotFound {
        /// The code that was not found.
        code: String,
    },

    /// Invalid promo code data.
    #[error(transparent)]
    InvalidPromoCode(#[from] PromoCodeError),

    /// Subscription state machine refused a transition.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// Unknown plan name.
    #[error(transparent)]
    UnknownPlan(#[from] UnknownPlan),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Invalid amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}
