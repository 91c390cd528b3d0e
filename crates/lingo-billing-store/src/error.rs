//! Error types for lingo billing storage.

use lingo_billing_core::PromoCodeError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("not found")]
    NotFound,

    /// A record with the same key already exists.
    #[error("already exists: {key}")]
    AlreadyExists {
        /// The conflicting key.
        key: String,
    },

    /// The user already holds a redemption receipt for this code.
    #[error("promo code {code} already redeemed by {user_id}")]
    AlreadyRedeemed {
        /// The redeemed code.
        code: String,
        /// The redeeming user.
        user_id: String,
    },

    /// The code has no redemptions left.
    #[error("promo code {code} reached its usage limit")]
    UsageLimitReached {
        /// The exhausted code.
        code: String,
    },

    /// Duplicate event (idempotency check failed).
    #[error("duplicate event: {event_id}")]
    DuplicateEvent {
        /// The event key that was duplicated.
        event_id: String,
    },

    /// The account changed since it was read.
    #[error("version conflict: expected {expected}, found {found}")]
    VersionConflict {
        /// Version the writer read.
        expected: u64,
        /// Version currently stored.
        found: u64,
    },

    /// An update would leave a promo code invalid.
    #[error(transparent)]
    InvalidPromoCode(#[from] PromoCodeError),
}
