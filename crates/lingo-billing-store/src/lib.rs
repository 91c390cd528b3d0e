//! `RocksDB` storage layer for lingo billing.
//!
//! This crate provides persistent storage for the promo code catalog and its
//! redemption ledger, billing accounts, payment history, notifications, and
//! provider event receipts, using `RocksDB` with column families for indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `promo_codes`: Promo code catalog, keyed by normalized code
//! - `promo_usage`: Redemption receipts, keyed by `user_id || code`
//! - `promo_usage_by_code` / `promo_usage_by_user`: Receipt indexes
//! - `accounts`: Billing accounts, keyed by `user_id`
//! - `payment_history` / `payment_history_by_user`: Payment records and index
//! - `notifications` / `notifications_by_user`: Notifications and index
//! - `processed_events`: Provider event receipts for idempotency
//!
//! # Atomicity
//!
//! Compound operations ([`Store::redeem_promo_code`], [`Store::commit_event`],
//! [`Store::update_promo_code`], [`Store::record_contact`]) run their checks and writes under a single
//! write lock and commit as one `WriteBatch`.
//!
//! # Example
//!
//! ```no_run
//! use lingo_billing_store::{RocksStore, Store};
//! use lingo_billing_core::{PromoCodeKey, UserId};
//!
//! let store = RocksStore::open("/tmp/lingo-billing-db").unwrap();
//!
//! let code = PromoCodeKey::normalize("save20").unwrap();
//! let promo = store.get_promo_code(&code).unwrap();
//! let redeemed = store.has_redeemed(&UserId::generate(), &code).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use lingo_billing_core::{
    BillingAccount, Notification, NotificationId, PaymentHistoryRecord, ProcessedEvent,
    PromoCode, PromoCodeKey, PromoCodeUpdate, PromoCodeUsage, UserId,
};

/// Everything one processed billing event writes, committed atomically.
#[derive(Debug, Clone)]
pub struct EventCommit {
    /// Idempotency receipt. The commit fails with `DuplicateEvent` if a
    /// receipt with the same key exists.
    pub receipt: ProcessedEvent,

    /// New account state. Its `version` must equal the stored version
    /// (0 when no account is stored); it is written with `version + 1`.
    pub account: Option<BillingAccount>,

    /// Payment history entry to append.
    pub payment: Option<PaymentHistoryRecord>,

    /// Notifications to deliver.
    pub notifications: Vec<Notification>,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Promo Code Operations
    // =========================================================================

    /// Insert a new promo code.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the code is taken.
    fn create_promo_code(&self, promo: &PromoCode) -> Result<()>;

    /// Get a promo code by its normalized key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_promo_code(&self, code: &PromoCodeKey) -> Result<Option<PromoCode>>;

    /// Apply an admin update under the write lock, so a concurrent
    /// redemption's `usage_count` increment is never overwritten.
    ///
    /// Returns the updated code.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the code doesn't exist.
    /// - `StoreError::InvalidPromoCode` if the update is invalid.
    fn update_promo_code(
        &self,
        code: &PromoCodeKey,
        update: &PromoCodeUpdate,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<PromoCode>;

    /// Permanently delete a promo code. Redemption receipts are kept.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the code doesn't exist.
    fn delete_promo_code(&self, code: &PromoCodeKey) -> Result<()>;

    /// List all promo codes, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_promo_codes(&self) -> Result<Vec<PromoCode>>;

    // =========================================================================
    // Redemption Operations
    // =========================================================================

    /// Check whether the user holds a redemption receipt for the code.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn has_redeemed(&self, user_id: &UserId, code: &PromoCodeKey) -> Result<bool>;

    /// Redeem a code atomically: write the receipt, increment `usage_count`,
    /// and stamp the user's billing account.
    ///
    /// Returns the updated promo code.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the code doesn't exist.
    /// - `StoreError::AlreadyRedeemed` if the receipt already exists.
    /// - `StoreError::UsageLimitReached` if the increment would pass the limit.
    fn redeem_promo_code(&self, usage: &PromoCodeUsage) -> Result<PromoCode>;

    /// List receipts for a code, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_usage_by_code(&self, code: &PromoCodeKey) -> Result<Vec<PromoCodeUsage>>;

    /// List receipts for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_usage_by_user(&self, user_id: &UserId) -> Result<Vec<PromoCodeUsage>>;

    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Get a billing account by user ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, user_id: &UserId) -> Result<Option<BillingAccount>>;

    /// Record a user's contact details, creating the account if needed.
    ///
    /// Runs under the write lock and touches only `email` and `name`; a
    /// `None` leaves the stored value alone. The version is bumped when
    /// anything changed, so an event decided on the older account fails its
    /// version check and is retried.
    ///
    /// Returns the stored account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn record_contact(
        &self,
        user_id: &UserId,
        email: Option<&str>,
        name: Option<&str>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<BillingAccount>;

    /// List all billing accounts.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_accounts(&self) -> Result<Vec<BillingAccount>>;

    // =========================================================================
    // Event Operations
    // =========================================================================

    /// Get the receipt for a processed event.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_processed_event(&self, key: &str) -> Result<Option<ProcessedEvent>>;

    /// Commit the effects of one event atomically.
    ///
    /// # Errors
    ///
    /// - `StoreError::DuplicateEvent` if the receipt key exists.
    /// - `StoreError::VersionConflict` if the account changed since it was read.
    fn commit_event(&self, commit: &EventCommit) -> Result<()>;

    // =========================================================================
    // Payment History Operations
    // =========================================================================

    /// List payment records for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_payments_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentHistoryRecord>>;

    // =========================================================================
    // Notification Operations
    // =========================================================================

    /// Store a notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_notification(&self, notification: &Notification) -> Result<()>;

    /// List a user's notifications, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_notifications(
        &self,
        user_id: &UserId,
        unread_only: bool,
        limit: usize,
    ) -> Result<Vec<Notification>>;

    /// Set the read flag of a user's notification.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the notification doesn't exist or
    /// belongs to another user.
    fn set_notification_read(
        &self,
        user_id: &UserId,
        id: &NotificationId,
        read: bool,
    ) -> Result<Notification>;
}
