//! Promo code engine: validation, redemption, and admin management.
//!
//! Validation runs the checks in a fixed order and stops at the first
//! failure. Redemption writes the receipt, the usage increment, and the
//! account stamp as one store operation; a racing duplicate surfaces as a
//! rejection rather than a second receipt.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use lingo_billing_core::{
    discounted_price, DiscountedPrice, NewPromoCode, Notification, NotificationKind, Plan,
    PromoCode, PromoCodeError, PromoCodeKey, PromoCodeRejection, PromoCodeStats, PromoCodeUpdate,
    PromoCodeUsage, PromoCodeValidation, UsageId, UserId,
};
use lingo_billing_store::{Store, StoreError};

/// Errors from promo code operations.
#[derive(Debug, thiserror::Error)]
pub enum PromoError {
    /// The code cannot be redeemed.
    #[error("promo code rejected: {0}")]
    Rejected(PromoCodeRejection),

    /// Admin input is invalid.
    #[error(transparent)]
    Invalid(#[from] PromoCodeError),

    /// No such code (admin operations).
    #[error("promo code not found: {0}")]
    NotFound(String),

    /// Storage failure.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for PromoError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyRedeemed { .. } => Self::Rejected(PromoCodeRejection::AlreadyUsed),
            StoreError::UsageLimitReached { .. } => {
                Self::Rejected(PromoCodeRejection::LimitReached)
            }
            StoreError::InvalidPromoCode(e) => Self::Invalid(e),
            other => Self::Store(other),
        }
    }
}

/// The user redeeming a code.
#[derive(Debug, Clone)]
pub struct Redeemer {
    /// User id.
    pub user_id: UserId,
    /// Display name, if known.
    pub name: Option<String>,
    /// Email, if known.
    pub email: Option<String>,
}

/// Input to [`PromoCodeEngine::apply`].
#[derive(Debug, Clone)]
pub struct ApplyPromoCode {
    /// The validated code.
    pub code: PromoCodeKey,
    /// Discount to record on the receipt.
    pub discount_percentage: u8,
    /// Plan being purchased.
    pub plan: Plan,
    /// The redeeming user.
    pub redeemer: Redeemer,
}

/// A successful redemption.
#[derive(Debug, Clone)]
pub struct Redemption {
    /// The receipt written.
    pub usage: PromoCodeUsage,
    /// The code after the usage increment.
    pub promo: PromoCode,
    /// Plan price with the discount applied.
    pub price: DiscountedPrice,
}

/// Validates, redeems, and manages promo codes.
#[derive(Clone)]
pub struct PromoCodeEngine {
    store: Arc<dyn Store>,
    admin_user_ids: Vec<UserId>,
}

impl PromoCodeEngine {
    /// Create an engine over `store`, notifying `admin_user_ids` on redemption.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, admin_user_ids: Vec<UserId>) -> Self {
        Self {
            store,
            admin_user_ids,
        }
    }

    // =========================================================================
    // Validation & Redemption
    // =========================================================================

    /// Validate `code` for `user_id` and `plan` at the current time.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails; rejections are a
    /// [`PromoCodeValidation::Invalid`] value.
    pub fn validate(
        &self,
        code: &str,
        user_id: &UserId,
        plan: Plan,
    ) -> Result<PromoCodeValidation, StoreError> {
        self.validate_at(code, user_id, plan, Utc::now())
    }

    /// Validate `code` for `user_id` and `plan` at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub fn validate_at(
        &self,
        code: &str,
        user_id: &UserId,
        plan: Plan,
        now: DateTime<Utc>,
    ) -> Result<PromoCodeValidation, StoreError> {
        let Ok(key) = PromoCodeKey::normalize(code) else {
            return Ok(PromoCodeValidation::Invalid(PromoCodeRejection::NotFound));
        };

        let Some(promo) = self.store.get_promo_code(&key)? else {
            return Ok(PromoCodeValidation::Invalid(PromoCodeRejection::NotFound));
        };

        if let Err(reason) = promo.check_availability(now) {
            // The user who took the last redemption is told they already used it
            if reason == PromoCodeRejection::LimitReached
                && self.store.has_redeemed(user_id, &promo.code)?
            {
                return Ok(PromoCodeValidation::Invalid(PromoCodeRejection::AlreadyUsed));
            }
            return Ok(PromoCodeValidation::Invalid(reason));
        }
        if self.store.has_redeemed(user_id, &promo.code)? {
            return Ok(PromoCodeValidation::Invalid(PromoCodeRejection::AlreadyUsed));
        }
        if let Err(reason) = promo.check_plan(plan) {
            return Ok(PromoCodeValidation::Invalid(reason));
        }

        Ok(PromoCodeValidation::Valid(promo))
    }

    /// Record a redemption. Does not repeat the business checks; the store
    /// still refuses a second receipt and an increment past the limit.
    ///
    /// # Errors
    ///
    /// - `PromoError::Rejected(AlreadyUsed | LimitReached)` on a lost race.
    /// - `PromoError::Rejected(NotFound)` if the code was deleted meanwhile.
    pub fn apply(&self, input: ApplyPromoCode, now: DateTime<Utc>) -> Result<Redemption, PromoError> {
        let usage = PromoCodeUsage {
            id: UsageId::generate(),
            code: input.code,
            user_id: input.redeemer.user_id.clone(),
            user_name: input.redeemer.name.clone(),
            user_email: input.redeemer.email.clone(),
            plan: input.plan,
            discount_percentage: input.discount_percentage,
            applied_at: now,
        };

        let promo = match self.store.redeem_promo_code(&usage) {
            Ok(promo) => promo,
            Err(StoreError::NotFound) => {
                return Err(PromoError::Rejected(PromoCodeRejection::NotFound))
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            code = %usage.code,
            user_id = %usage.user_id,
            plan = %usage.plan,
            discount = usage.discount_percentage,
            "Promo code applied"
        );

        self.notify_admins(&usage, &input.redeemer, now);

        let price = discounted_price(usage.plan.monthly_price_cents(), usage.discount_percentage);
        Ok(Redemption {
            usage,
            promo,
            price,
        })
    }

    /// Validate then apply in one call.
    ///
    /// # Errors
    ///
    /// Returns `PromoError::Rejected` with the first failing check, or the
    /// conflict detected at apply time.
    pub fn redeem(
        &self,
        code: &str,
        redeemer: Redeemer,
        plan: Plan,
        now: DateTime<Utc>,
    ) -> Result<Redemption, PromoError> {
        match self.validate_at(code, &redeemer.user_id, plan, now)? {
            PromoCodeValidation::Invalid(reason) => {
                tracing::debug!(
                    code = %code,
                    user_id = %redeemer.user_id,
                    reason = reason.code(),
                    "Promo code rejected"
                );
                Err(PromoError::Rejected(reason))
            }
            PromoCodeValidation::Valid(promo) => self.apply(
                ApplyPromoCode {
                    code: promo.code,
                    discount_percentage: promo.discount_percentage,
                    plan,
                    redeemer,
                },
                now,
            ),
        }
    }

    fn notify_admins(&self, usage: &PromoCodeUsage, redeemer: &Redeemer, now: DateTime<Utc>) {
        let who = redeemer
            .name
            .as_deref()
            .or(redeemer.email.as_deref())
            .unwrap_or_else(|| redeemer.user_id.as_str());

        for admin_id in &self.admin_user_ids {
            let notification = Notification::new(
                admin_id.clone(),
                NotificationKind::System,
                "Promo Code Used",
                format!(
                    "{who} used promo code {} ({}% discount)",
                    usage.code, usage.discount_percentage
                ),
                now,
            )
            .with_data(json!({
                "promoCode": usage.code,
                "userId": usage.user_id,
                "plan": usage.plan,
            }));

            if let Err(e) = self.store.put_notification(&notification) {
                tracing::warn!(admin_id = %admin_id, error = %e, "Failed to notify admin of promo use");
            }
        }
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Create a code.
    ///
    /// # Errors
    ///
    /// Returns `PromoError::Invalid` for bad input, or a store conflict if
    /// the code exists.
    pub fn create(
        &self,
        input: NewPromoCode,
        created_by: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<PromoCode, PromoError> {
        let promo = input.into_promo_code(created_by, now)?;
        self.store.create_promo_code(&promo)?;
        tracing::info!(code = %promo.code, discount = promo.discount_percentage, "Promo code created");
        Ok(promo)
    }

    /// Edit a code. The usage count is never touched; renames are refused.
    ///
    /// # Errors
    ///
    /// Returns `PromoError::NotFound` or `PromoError::Invalid`.
    pub fn update(
        &self,
        code: &str,
        update: &PromoCodeUpdate,
        now: DateTime<Utc>,
    ) -> Result<PromoCode, PromoError> {
        let key = Self::admin_key(code)?;
        match self.store.update_promo_code(&key, update, now) {
            Ok(promo) => Ok(promo),
            Err(StoreError::NotFound) => Err(PromoError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Switch a code on or off.
    ///
    /// # Errors
    ///
    /// Returns `PromoError::NotFound` if the code doesn't exist.
    pub fn set_active(
        &self,
        code: &str,
        is_active: bool,
        now: DateTime<Utc>,
    ) -> Result<PromoCode, PromoError> {
        let update = PromoCodeUpdate {
            is_active: Some(is_active),
            ..PromoCodeUpdate::default()
        };
        self.update(code, &update, now)
    }

    /// Soft-delete a code (deactivate; receipts and stats stay).
    ///
    /// # Errors
    ///
    /// Returns `PromoError::NotFound` if the code doesn't exist.
    pub fn soft_delete(&self, code: &str, now: DateTime<Utc>) -> Result<PromoCode, PromoError> {
        self.set_active(code, false, now)
    }

    /// Permanently remove a code. Existing receipts are retained.
    ///
    /// # Errors
    ///
    /// Returns `PromoError::NotFound` if the code doesn't exist.
    pub fn delete_permanently(&self, code: &str) -> Result<(), PromoError> {
        let key = Self::admin_key(code)?;
        match self.store.delete_promo_code(&key) {
            Ok(()) => {
                tracing::warn!(code = %key, "Promo code permanently deleted");
                Ok(())
            }
            Err(StoreError::NotFound) => Err(PromoError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Get a code.
    ///
    /// # Errors
    ///
    /// Returns `PromoError::NotFound` if the code doesn't exist.
    pub fn get(&self, code: &str) -> Result<PromoCode, PromoError> {
        let key = Self::admin_key(code)?;
        self.store
            .get_promo_code(&key)?
            .ok_or_else(|| PromoError::NotFound(key.to_string()))
    }

    /// List codes, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn list(&self, active_only: bool) -> Result<Vec<PromoCode>, PromoError> {
        let codes = self.store.list_promo_codes()?;
        Ok(codes
            .into_iter()
            .filter(|p| !active_only || p.is_active)
            .collect())
    }

    /// Codes a student could redeem right now: active, inside their window,
    /// with uses left.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn list_available(&self, now: DateTime<Utc>) -> Result<Vec<PromoCode>, PromoError> {
        let codes = self.store.list_promo_codes()?;
        Ok(codes.into_iter().filter(|p| p.is_available(now)).collect())
    }

    /// Receipts for a code, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn usage_for_code(&self, code: &str) -> Result<Vec<PromoCodeUsage>, PromoError> {
        let key = Self::admin_key(code)?;
        Ok(self.store.list_usage_by_code(&key)?)
    }

    /// Receipts for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn usage_for_user(&self, user_id: &UserId) -> Result<Vec<PromoCodeUsage>, PromoError> {
        Ok(self.store.list_usage_by_user(user_id)?)
    }

    /// Usage statistics for a code.
    ///
    /// # Errors
    ///
    /// Returns `PromoError::NotFound` if the code doesn't exist.
    pub fn stats(&self, code: &str) -> Result<PromoCodeStats, PromoError> {
        let promo = self.get(code)?;
        let usages = self.store.list_usage_by_code(&promo.code)?;
        Ok(PromoCodeStats::from_usages(&promo, &usages))
    }

    fn admin_key(code: &str) -> Result<PromoCodeKey, PromoError> {
        PromoCodeKey::normalize(code).map_err(|_| PromoError::NotFound(code.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lingo_billing_store::RocksStore;
    use tempfile::TempDir;

    fn engine_with_admin(admin: Option<UserId>) -> (PromoCodeEngine, Arc<dyn Store>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn Store> = Arc::new(RocksStore::open(dir.path()).unwrap());
        let engine = PromoCodeEngine::new(Arc::clone(&store), admin.into_iter().collect());
        (engine, store, dir)
    }

    fn save20(usage_limit: Option<u32>) -> NewPromoCode {
        NewPromoCode {
            code: "SAVE20".into(),
            discount_percentage: 20,
            description: Some("Launch discount".into()),
            valid_from: None,
            valid_until: None,
            usage_limit,
            applicable_plans: vec![],
            is_active: true,
        }
    }

    fn redeemer(user_id: &UserId) -> Redeemer {
        Redeemer {
            user_id: user_id.clone(),
            name: Some("Amal".into()),
            email: Some("amal@example.com".into()),
        }
    }

    #[test]
    fn save20_scenario() {
        let (engine, _store, _dir) = engine_with_admin(None);
        let now = Utc::now();
        engine.create(save20(Some(1)), None, now).unwrap();
        let u1: UserId = "u1".parse().unwrap();
        let u2: UserId = "u2".parse().unwrap();

        let validation = engine.validate_at("save20", &u1, Plan::Premium, now).unwrap();
        let PromoCodeValidation::Valid(promo) = validation else {
            panic!("expected valid code");
        };
        assert_eq!(promo.discount_percentage, 20);

        let redemption = engine
            .apply(
                ApplyPromoCode {
                    code: promo.code.clone(),
                    discount_percentage: 20,
                    plan: Plan::Premium,
                    redeemer: redeemer(&u1),
                },
                now,
            )
            .unwrap();
        assert_eq!(redemption.promo.usage_count, 1);
        assert_eq!(redemption.price.final_cents, 3920);

        assert_eq!(
            engine.validate_at("SAVE20", &u1, Plan::Premium, now).unwrap(),
            PromoCodeValidation::Invalid(PromoCodeRejection::AlreadyUsed)
        );
        assert_eq!(
            engine.validate_at("SAVE20", &u2, Plan::Premium, now).unwrap(),
            PromoCodeValidation::Invalid(PromoCodeRejection::LimitReached)
        );
    }

    #[test]
    fn already_used_when_limit_allows_more() {
        let (engine, _store, _dir) = engine_with_admin(None);
        let now = Utc::now();
        engine.create(save20(None), None, now).unwrap();
        let user = UserId::generate();

        engine.redeem("save20", redeemer(&user), Plan::Basic, now).unwrap();
        let err = engine.redeem("save20", redeemer(&user), Plan::Basic, now).unwrap_err();
        assert!(matches!(err, PromoError::Rejected(PromoCodeRejection::AlreadyUsed)));
    }

    #[test]
    fn validate_reports_already_used_below_limit() {
        let (engine, _store, _dir) = engine_with_admin(None);
        let now = Utc::now();
        engine.create(save20(Some(5)), None, now).unwrap();
        let user = UserId::generate();

        engine.redeem("save20", redeemer(&user), Plan::Premium, now).unwrap();
        assert_eq!(
            engine.validate_at("SAVE20", &user, Plan::Premium, now).unwrap(),
            PromoCodeValidation::Invalid(PromoCodeRejection::AlreadyUsed)
        );
        assert!(engine
            .validate_at("SAVE20", &UserId::generate(), Plan::Premium, now)
            .unwrap()
            .is_valid());
    }

    #[test]
    fn apply_race_surfaces_as_rejection() {
        let (engine, _store, _dir) = engine_with_admin(None);
        let now = Utc::now();
        let promo = engine.create(save20(None), None, now).unwrap();
        let user = UserId::generate();
        let input = ApplyPromoCode {
            code: promo.code,
            discount_percentage: 20,
            plan: Plan::Basic,
            redeemer: redeemer(&user),
        };

        engine.apply(input.clone(), now).unwrap();
        let err = engine.apply(input, now).unwrap_err();
        assert!(matches!(err, PromoError::Rejected(PromoCodeRejection::AlreadyUsed)));
    }

    #[test]
    fn checks_run_in_order() {
        let (engine, _store, _dir) = engine_with_admin(None);
        let now = Utc::now();
        let user = UserId::generate();

        assert_eq!(
            engine.validate_at("NOPE", &user, Plan::Basic, now).unwrap(),
            PromoCodeValidation::Invalid(PromoCodeRejection::NotFound)
        );
        assert_eq!(
            engine.validate_at("bad code!", &user, Plan::Basic, now).unwrap(),
            PromoCodeValidation::Invalid(PromoCodeRejection::NotFound)
        );

        let mut input = save20(None);
        input.valid_from = Some(now + Duration::days(1));
        input.applicable_plans = vec![Plan::Premium];
        engine.create(input, None, now).unwrap();
        // Window is checked before plan applicability
        assert_eq!(
            engine.validate_at("SAVE20", &user, Plan::Basic, now).unwrap(),
            PromoCodeValidation::Invalid(PromoCodeRejection::NotYetValid {
                valid_from: now + Duration::days(1)
            })
        );
        assert!(matches!(
            engine
                .validate_at("SAVE20", &user, Plan::Basic, now + Duration::days(2))
                .unwrap(),
            PromoCodeValidation::Invalid(PromoCodeRejection::PlanNotApplicable { .. })
        ));
        assert!(engine
            .validate_at("SAVE20", &user, Plan::Premium, now + Duration::days(2))
            .unwrap()
            .is_valid());
    }

    #[test]
    fn redemption_notifies_admins() {
        let admin = UserId::generate();
        let (engine, store, _dir) = engine_with_admin(Some(admin.clone()));
        let now = Utc::now();
        engine.create(save20(None), None, now).unwrap();

        engine
            .redeem("SAVE20", redeemer(&UserId::generate()), Plan::Premium, now)
            .unwrap();

        let notifications = store.list_notifications(&admin, false, 10).unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].title, "Promo Code Used");
        assert_eq!(
            notifications[0].body,
            "Amal used promo code SAVE20 (20% discount)"
        );
    }

    #[test]
    fn soft_delete_keeps_stats() {
        let (engine, _store, _dir) = engine_with_admin(None);
        let now = Utc::now();
        engine.create(save20(None), None, now).unwrap();
        engine
            .redeem("SAVE20", redeemer(&UserId::generate()), Plan::Premium, now)
            .unwrap();

        let deleted = engine.soft_delete("save20", now).unwrap();
        assert!(!deleted.is_active);
        assert!(engine.list(true).unwrap().is_empty());
        assert_eq!(engine.list(false).unwrap().len(), 1);
        assert_eq!(engine.stats("SAVE20").unwrap().total_usage, 1);

        engine.delete_permanently("SAVE20").unwrap();
        assert!(matches!(engine.get("SAVE20"), Err(PromoError::NotFound(_))));
        assert!(matches!(
            engine.delete_permanently("SAVE20"),
            Err(PromoError::NotFound(_))
        ));
    }

    #[test]
    fn available_excludes_expired_and_exhausted() {
        let (engine, _store, _dir) = engine_with_admin(None);
        let now = Utc::now();
        engine.create(save20(None), None, now).unwrap();

        let mut expired = save20(None);
        expired.code = "OLD".into();
        expired.valid_until = Some(now - Duration::days(1));
        engine.create(expired, None, now).unwrap();

        let mut single = save20(Some(1));
        single.code = "ONE".into();
        engine.create(single, None, now).unwrap();
        engine
            .redeem("ONE", redeemer(&UserId::generate()), Plan::Basic, now)
            .unwrap();

        let available = engine.list_available(now).unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].code.as_str(), "SAVE20");
    }
}
