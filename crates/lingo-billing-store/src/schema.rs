//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Promo code catalog, keyed by normalized code.
    pub const PROMO_CODES: &str = "promo_codes";

    /// Redemption receipts, keyed by `user_id || 0x00 || code`.
    pub const PROMO_USAGE: &str = "promo_usage";

    /// Index: receipts by code, keyed by `code || 0x00 || usage_id`.
    /// Value is the receipt key.
    pub const PROMO_USAGE_BY_CODE: &str = "promo_usage_by_code";

    /// Index: receipts by user, keyed by `user_id || 0x00 || usage_id`.
    /// Value is the receipt key.
    pub const PROMO_USAGE_BY_USER: &str = "promo_usage_by_user";

    /// Billing accounts, keyed by `user_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Payment history, keyed by `payment_id` (ULID).
    pub const PAYMENT_HISTORY: &str = "payment_history";

    /// Index: payments by user, keyed by `user_id || 0x00 || payment_id`.
    /// Value is the payment key.
    pub const PAYMENT_HISTORY_BY_USER: &str = "payment_history_by_user";

    /// Notifications, keyed by `notification_id` (ULID).
    pub const NOTIFICATIONS: &str = "notifications";

    /// Index: notifications by recipient, keyed by `user_id || 0x00 || notification_id`.
    /// Value is the notification key.
    pub const NOTIFICATIONS_BY_USER: &str = "notifications_by_user";

    /// Idempotency receipts for provider events, keyed by `provider:event_id`.
    pub const PROCESSED_EVENTS: &str = "processed_events";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::PROMO_CODES,
        cf::PROMO_USAGE,
        cf::PROMO_USAGE_BY_CODE,
        cf::PROMO_USAGE_BY_USER,
        cf::ACCOUNTS,
        cf::PAYMENT_HISTORY,
        cf::PAYMENT_HISTORY_BY_USER,
        cf::NOTIFICATIONS,
        cf::NOTIFICATIONS_BY_USER,
        cf::PROCESSED_EVENTS,
    ]
}
