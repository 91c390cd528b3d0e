//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use lingo_billing_core::{
    AppliedPromoCode, BillingAccount, Notification, NotificationId, PaymentHistoryRecord,
    ProcessedEvent, PromoCode, PromoCodeKey, PromoCodeUpdate, PromoCodeUsage, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{EventCommit, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    /// Serializes read-check-write sequences (redemption, event commit,
    /// promo updates). Single-key reads and plain puts do not take it.
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Database("write lock poisoned".to_string()))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_value<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Collect the values of an owner index (primary keys), newest first.
    fn index_values_newest_first(&self, index_cf: &str, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let cf = self.cf(index_cf)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        // ULID suffixes keep entries in creation order
        let mut values = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(value.to_vec());
        }
        values.reverse();
        Ok(values)
    }

    /// Load the records an owner index points at, newest first.
    fn load_indexed<T: serde::de::DeserializeOwned>(
        &self,
        index_cf: &str,
        data_cf: &str,
        prefix: &[u8],
    ) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for key in self.index_values_newest_first(index_cf, prefix)? {
            if let Some(record) = self.get_value(data_cf, &key)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn scan_all<T: serde::de::DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            records.push(Self::deserialize(&value)?);
        }
        Ok(records)
    }

    fn put_notification_in(&self, batch: &mut WriteBatch, notification: &Notification) -> Result<()> {
        let cf_notifications = self.cf(cf::NOTIFICATIONS)?;
        let cf_by_user = self.cf(cf::NOTIFICATIONS_BY_USER)?;

        let key = keys::record_key(notification.id.to_bytes());
        let index_key =
            keys::owner_index_key(notification.recipient_id.as_str(), notification.id.to_bytes());

        batch.put_cf(&cf_notifications, &key, Self::serialize(notification)?);
        batch.put_cf(&cf_by_user, index_key, &key);
        Ok(())
    }

    fn stamp_redemption(
        account: &mut BillingAccount,
        usage: &PromoCodeUsage,
        now: DateTime<Utc>,
    ) {
        account.applied_promo = Some(AppliedPromoCode {
            code: usage.code.clone(),
            discount_percentage: usage.discount_percentage,
            applied_at: usage.applied_at,
        });
        if account.email.is_none() {
            account.email.clone_from(&usage.user_email);
        }
        if account.name.is_none() {
            account.name.clone_from(&usage.user_name);
        }
        account.version += 1;
        account.updated_at = now;
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Promo Code Operations
    // =========================================================================

    fn create_promo_code(&self, promo: &PromoCode) -> Result<()> {
        let _guard = self.lock()?;
        let cf = self.cf(cf::PROMO_CODES)?;
        let key = keys::promo_code_key(&promo.code);

        if self.get_promo_code(&promo.code)?.is_some() {
            return Err(StoreError::AlreadyExists {
                key: promo.code.to_string(),
            });
        }

        self.db
            .put_cf(&cf, key, Self::serialize(promo)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_promo_code(&self, code: &PromoCodeKey) -> Result<Option<PromoCode>> {
        self.get_value(cf::PROMO_CODES, &keys::promo_code_key(code))
    }

    fn update_promo_code(
        &self,
        code: &PromoCodeKey,
        update: &PromoCodeUpdate,
        now: DateTime<Utc>,
    ) -> Result<PromoCode> {
        let _guard = self.lock()?;
        let cf = self.cf(cf::PROMO_CODES)?;

        let mut promo = self.get_promo_code(code)?.ok_or(StoreError::NotFound)?;
        update.apply_to(&mut promo, now)?;

        self.db
            .put_cf(&cf, keys::promo_code_key(code), Self::serialize(&promo)?)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(promo)
    }

    fn delete_promo_code(&self, code: &PromoCodeKey) -> Result<()> {
        let _guard = self.lock()?;
        let cf = self.cf(cf::PROMO_CODES)?;

        if self.get_promo_code(code)?.is_none() {
            return Err(StoreError::NotFound);
        }

        self.db
            .delete_cf(&cf, keys::promo_code_key(code))
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn list_promo_codes(&self) -> Result<Vec<PromoCode>> {
        let mut codes: Vec<PromoCode> = self.scan_all(cf::PROMO_CODES)?;
        codes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(codes)
    }

    // =========================================================================
    // Redemption Operations
    // =========================================================================

    fn has_redeemed(&self, user_id: &UserId, code: &PromoCodeKey) -> Result<bool> {
        let cf = self.cf(cf::PROMO_USAGE)?;
        let exists = self
            .db
            .get_cf(&cf, keys::redemption_key(user_id, code))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        Ok(exists)
    }

    fn redeem_promo_code(&self, usage: &PromoCodeUsage) -> Result<PromoCode> {
        let _guard = self.lock()?;

        if self.has_redeemed(&usage.user_id, &usage.code)? {
            return Err(StoreError::AlreadyRedeemed {
                code: usage.code.to_string(),
                user_id: usage.user_id.to_string(),
            });
        }

        let mut promo = self.get_promo_code(&usage.code)?.ok_or(StoreError::NotFound)?;
        if promo.is_exhausted() {
            return Err(StoreError::UsageLimitReached {
                code: promo.code.to_string(),
            });
        }
        promo.usage_count = promo.usage_count.checked_add(1).ok_or_else(|| {
            StoreError::UsageLimitReached {
                code: promo.code.to_string(),
            }
        })?;

        let now = usage.applied_at;
        let mut account = self
            .get_account(&usage.user_id)?
            .unwrap_or_else(|| BillingAccount::new(usage.user_id.clone(), now));
        Self::stamp_redemption(&mut account, usage, now);

        let cf_codes = self.cf(cf::PROMO_CODES)?;
        let cf_usage = self.cf(cf::PROMO_USAGE)?;
        let cf_by_code = self.cf(cf::PROMO_USAGE_BY_CODE)?;
        let cf_by_user = self.cf(cf::PROMO_USAGE_BY_USER)?;
        let cf_accounts = self.cf(cf::ACCOUNTS)?;

        let receipt_key = keys::redemption_key(&usage.user_id, &usage.code);
        let by_code_key = keys::owner_index_key(usage.code.as_str(), usage.id.to_bytes());
        let by_user_key = keys::owner_index_key(usage.user_id.as_str(), usage.id.to_bytes());

        // Write atomically
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_codes, keys::promo_code_key(&promo.code), Self::serialize(&promo)?);
        batch.put_cf(&cf_usage, &receipt_key, Self::serialize(usage)?);
        batch.put_cf(&cf_by_code, by_code_key, &receipt_key);
        batch.put_cf(&cf_by_user, by_user_key, &receipt_key);
        batch.put_cf(
            &cf_accounts,
            keys::account_key(&account.user_id),
            Self::serialize(&account)?,
        );
        self.write(batch)?;

        tracing::debug!(
            code = %promo.code,
            user_id = %usage.user_id,
            usage_count = promo.usage_count,
            "Promo code redeemed"
        );

        Ok(promo)
    }

    fn list_usage_by_code(&self, code: &PromoCodeKey) -> Result<Vec<PromoCodeUsage>> {
        self.load_indexed(
            cf::PROMO_USAGE_BY_CODE,
            cf::PROMO_USAGE,
            &keys::owner_prefix(code.as_str()),
        )
    }

    fn list_usage_by_user(&self, user_id: &UserId) -> Result<Vec<PromoCodeUsage>> {
        self.load_indexed(
            cf::PROMO_USAGE_BY_USER,
            cf::PROMO_USAGE,
            &keys::owner_prefix(user_id.as_str()),
        )
    }

    // =========================================================================
    // Account Operations
    // =========================================================================

    fn get_account(&self, user_id: &UserId) -> Result<Option<BillingAccount>> {
        self.get_value(cf::ACCOUNTS, &keys::account_key(user_id))
    }

    fn record_contact(
        &self,
        user_id: &UserId,
        email: Option<&str>,
        name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<BillingAccount> {
        let _guard = self.lock()?;

        let stored = self.get_account(user_id)?;
        let mut account = stored
            .clone()
            .unwrap_or_else(|| BillingAccount::new(user_id.clone(), now));
        if let Some(email) = email {
            account.email = Some(email.to_string());
        }
        if let Some(name) = name {
            account.name = Some(name.to_string());
        }
        if stored.as_ref() == Some(&account) {
            return Ok(account);
        }

        account.version += 1;
        account.updated_at = now;
        let cf = self.cf(cf::ACCOUNTS)?;
        self.db
            .put_cf(&cf, keys::account_key(user_id), Self::serialize(&account)?)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::debug!(user_id = %user_id, version = account.version, "Contact details recorded");
        Ok(account)
    }

    fn list_accounts(&self) -> Result<Vec<BillingAccount>> {
        self.scan_all(cf::ACCOUNTS)
    }

    // =========================================================================
    // Event Operations
    // =========================================================================

    fn get_processed_event(&self, key: &str) -> Result<Option<ProcessedEvent>> {
        self.get_value(cf::PROCESSED_EVENTS, &keys::processed_event_key(key))
    }

    fn commit_event(&self, commit: &EventCommit) -> Result<()> {
        let _guard = self.lock()?;

        if self.get_processed_event(&commit.receipt.key)?.is_some() {
            return Err(StoreError::DuplicateEvent {
                event_id: commit.receipt.key.clone(),
            });
        }

        let mut batch = WriteBatch::default();

        if let Some(account) = &commit.account {
            let found = self
                .get_account(&account.user_id)?
                .map_or(0, |stored| stored.version);
            if found != account.version {
                return Err(StoreError::VersionConflict {
                    expected: account.version,
                    found,
                });
            }
            let mut next = account.clone();
            next.version += 1;

            let cf_accounts = self.cf(cf::ACCOUNTS)?;
            batch.put_cf(
                &cf_accounts,
                keys::account_key(&next.user_id),
                Self::serialize(&next)?,
            );
        }

        if let Some(payment) = &commit.payment {
            let cf_payments = self.cf(cf::PAYMENT_HISTORY)?;
            let cf_by_user = self.cf(cf::PAYMENT_HISTORY_BY_USER)?;
            let key = keys::record_key(payment.id.to_bytes());
            let index_key = keys::owner_index_key(payment.user_id.as_str(), payment.id.to_bytes());
            batch.put_cf(&cf_payments, &key, Self::serialize(payment)?);
            batch.put_cf(&cf_by_user, index_key, &key);
        }

        for notification in &commit.notifications {
            self.put_notification_in(&mut batch, notification)?;
        }

        let cf_events = self.cf(cf::PROCESSED_EVENTS)?;
        batch.put_cf(
            &cf_events,
            keys::processed_event_key(&commit.receipt.key),
            Self::serialize(&commit.receipt)?,
        );

        self.write(batch)?;

        tracing::debug!(
            event = %commit.receipt.key,
            disposition = ?commit.receipt.disposition,
            "Event committed"
        );

        Ok(())
    }

    // =========================================================================
    // Payment History Operations
    // =========================================================================

    fn list_payments_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentHistoryRecord>> {
        let keys = self.index_values_newest_first(
            cf::PAYMENT_HISTORY_BY_USER,
            &keys::owner_prefix(user_id.as_str()),
        )?;

        let mut payments = Vec::new();
        for key in keys.into_iter().skip(offset).take(limit) {
            if let Some(payment) = self.get_value(cf::PAYMENT_HISTORY, &key)? {
                payments.push(payment);
            }
        }
        Ok(payments)
    }

    // =========================================================================
    // Notification Operations
    // =========================================================================

    fn put_notification(&self, notification: &Notification) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put_notification_in(&mut batch, notification)?;
        self.write(batch)
    }

    fn list_notifications(
        &self,
        user_id: &UserId,
        unread_only: bool,
        limit: usize,
    ) -> Result<Vec<Notification>> {
        let all: Vec<Notification> = self.load_indexed(
            cf::NOTIFICATIONS_BY_USER,
            cf::NOTIFICATIONS,
            &keys::owner_prefix(user_id.as_str()),
        )?;
        Ok(all
            .into_iter()
            .filter(|n| !unread_only || !n.read)
            .take(limit)
            .collect())
    }

    fn set_notification_read(
        &self,
        user_id: &UserId,
        id: &NotificationId,
        read: bool,
    ) -> Result<Notification> {
        let _guard = self.lock()?;
        let key = keys::record_key(id.to_bytes());

        let mut notification: Notification = self
            .get_value(cf::NOTIFICATIONS, &key)?
            .filter(|n: &Notification| &n.recipient_id == user_id)
            .ok_or(StoreError::NotFound)?;
        notification.read = read;

        let cf = self.cf(cf::NOTIFICATIONS)?;
        self.db
            .put_cf(&cf, key, Self::serialize(&notification)?)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(notification)
    }
}
