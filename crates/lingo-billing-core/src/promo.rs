//! Promotional codes, redemption receipts, and the rules that gate them.
//!
//! A [`PromoCode`] is keyed by its normalized code. Availability checks that
//! only need the code itself (active flag, window, usage limit, plan) live
//! here; the per-user "already used" check needs the redemption ledger and is
//! performed by the engine against the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::ids::{UsageId, UserId};
use crate::plan::Plan;

/// Longest accepted promo code.
pub const MAX_PROMO_CODE_LEN: usize = 64;

// ============================================================================
// Code key
// ============================================================================

/// A normalized promo code: trimmed, upper-case, `[A-Z0-9-]+`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PromoCodeKey(String);

impl PromoCodeKey {
    /// Normalize user input into a code key.
    ///
    /// # Errors
    ///
    /// Returns [`PromoCodeError::InvalidCode`] if the normalized input is empty,
    /// too long, or contains characters other than letters, digits, and dashes.
    pub fn normalize(input: &str) -> Result<Self, PromoCodeError> {
        let code = input.trim().to_uppercase();
        if code.is_empty()
            || code.len() > MAX_PROMO_CODE_LEN
            || !code
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(PromoCodeError::InvalidCode(input.trim().to_string()));
        }
        Ok(Self(code))
    }

    /// Return the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PromoCodeKey {
    type Err = PromoCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

impl TryFrom<String> for PromoCodeKey {
    type Error = PromoCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::normalize(&value)
    }
}

impl From<PromoCodeKey> for String {
    fn from(key: PromoCodeKey) -> Self {
        key.0
    }
}

impl fmt::Debug for PromoCodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PromoCodeKey({})", self.0)
    }
}

impl fmt::Display for PromoCodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Promo code
// ============================================================================

/// A discount code managed by admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoCode {
    /// Normalized code, unique.
    pub code: PromoCodeKey,

    /// Discount percentage, 1-100.
    pub discount_percentage: u8,

    /// Free-form admin description.
    pub description: Option<String>,

    /// Start of the validity window (inclusive). `None` = no lower bound.
    pub valid_from: Option<DateTime<Utc>>,

    /// End of the validity window (inclusive). `None` = no upper bound.
    pub valid_until: Option<DateTime<Utc>>,

    /// Maximum number of redemptions. `None` = unlimited.
    pub usage_limit: Option<u32>,

    /// Number of redemptions so far. Only redemption increments it.
    pub usage_count: u32,

    /// Plans the code applies to. Empty = all plans.
    pub applicable_plans: Vec<Plan>,

    /// Manual on/off switch, independent of the window.
    pub is_active: bool,

    /// Admin who created the code.
    pub created_by: Option<String>,

    /// When the code was created.
    pub created_at: DateTime<Utc>,

    /// When the code was last modified.
    pub updated_at: DateTime<Utc>,
}

impl PromoCode {
    /// Check the code-level availability rules in order: active flag,
    /// window start, window end, usage limit.
    ///
    /// # Errors
    ///
    /// Returns the first rejection that applies.
    pub fn check_availability(&self, now: DateTime<Utc>) -> Result<(), PromoCodeRejection> {
        if !self.is_active {
            return Err(PromoCodeRejection::Inactive);
        }
        if let Some(valid_from) = self.valid_from {
            if now < valid_from {
                return Err(PromoCodeRejection::NotYetValid { valid_from });
            }
        }
        if let Some(valid_until) = self.valid_until {
            if now > valid_until {
                return Err(PromoCodeRejection::Expired);
            }
        }
        if self.is_exhausted() {
            return Err(PromoCodeRejection::LimitReached);
        }
        Ok(())
    }

    /// Check whether the code applies to `plan`.
    ///
    /// # Errors
    ///
    /// Returns [`PromoCodeRejection::PlanNotApplicable`] if the code is
    /// restricted to other plans.
    pub fn check_plan(&self, plan: Plan) -> Result<(), PromoCodeRejection> {
        if self.applies_to(plan) {
            Ok(())
        } else {
            Err(PromoCodeRejection::PlanNotApplicable {
                applicable_plans: self.applicable_plans.clone(),
            })
        }
    }

    /// Whether the code applies to `plan` (an empty plan list applies to all).
    #[must_use]
    pub fn applies_to(&self, plan: Plan) -> bool {
        self.applicable_plans.is_empty() || self.applicable_plans.contains(&plan)
    }

    /// Whether the usage limit has been reached.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.usage_limit
            .is_some_and(|limit| self.usage_count >= limit)
    }

    /// Remaining redemptions, or `None` when unlimited.
    #[must_use]
    pub fn remaining_uses(&self) -> Option<u32> {
        self.usage_limit
            .map(|limit| limit.saturating_sub(self.usage_count))
    }

    /// Whether a student could redeem this code right now (ignoring the
    /// per-user and plan checks).
    #[must_use]
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.check_availability(now).is_ok()
    }

    fn validate_fields(&self) -> Result<(), PromoCodeError> {
        if self.discount_percentage == 0 || self.discount_percentage > 100 {
            return Err(PromoCodeError::InvalidDiscount(self.discount_percentage));
        }
        if let (Some(from), Some(until)) = (self.valid_from, self.valid_until) {
            if from > until {
                return Err(PromoCodeError::InvalidWindow);
            }
        }
        if self.usage_limit == Some(0) {
            return Err(PromoCodeError::InvalidUsageLimit);
        }
        Ok(())
    }
}

/// Admin input for creating a promo code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPromoCode {
    /// Code as typed; normalized on creation.
    pub code: String,

    /// Discount percentage, 1-100.
    pub discount_percentage: u8,

    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,

    /// Start of the validity window.
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,

    /// End of the validity window.
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,

    /// Maximum number of redemptions.
    #[serde(default)]
    pub usage_limit: Option<u32>,

    /// Plans the code applies to. Empty = all.
    #[serde(default)]
    pub applicable_plans: Vec<Plan>,

    /// Whether the code starts active.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

const fn default_active() -> bool {
    true
}

impl NewPromoCode {
    /// Validate the input and build a promo code with a zero usage count.
    ///
    /// # Errors
    ///
    /// Returns an error if the code format, discount, window, or limit is invalid.
    pub fn into_promo_code(
        self,
        created_by: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<PromoCode, PromoCodeError> {
        let mut applicable_plans = self.applicable_plans;
        applicable_plans.sort();
        applicable_plans.dedup();

        let promo = PromoCode {
            code: PromoCodeKey::normalize(&self.code)?,
            discount_percentage: self.discount_percentage,
            description: self.description,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            usage_limit: self.usage_limit,
            usage_count: 0,
            applicable_plans,
            is_active: self.is_active,
            created_by,
            created_at: now,
            updated_at: now,
        };
        promo.validate_fields()?;
        Ok(promo)
    }
}

/// Admin input for editing a promo code.
///
/// Absent fields are left unchanged. Nullable fields accept an explicit
/// `null` to clear them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromoCodeUpdate {
    /// Must match the existing code if present; codes cannot be renamed.
    #[serde(default)]
    pub code: Option<String>,

    /// New discount percentage.
    #[serde(default)]
    pub discount_percentage: Option<u8>,

    /// New description (`null` clears).
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,

    /// New window start (`null` clears).
    #[serde(default, deserialize_with = "double_option")]
    pub valid_from: Option<Option<DateTime<Utc>>>,

    /// New window end (`null` clears).
    #[serde(default, deserialize_with = "double_option")]
    pub valid_until: Option<Option<DateTime<Utc>>>,

    /// New usage limit (`null` = unlimited).
    #[serde(default, deserialize_with = "double_option")]
    pub usage_limit: Option<Option<u32>>,

    /// New plan restriction.
    #[serde(default)]
    pub applicable_plans: Option<Vec<Plan>>,

    /// New active flag.
    #[serde(default)]
    pub is_active: Option<bool>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl PromoCodeUpdate {
    /// Apply the update to `promo`, leaving `usage_count` untouched.
    ///
    /// The update is validated as a whole: on error `promo` is unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error on a rename attempt or if the result would be invalid.
    pub fn apply_to(&self, promo: &mut PromoCode, now: DateTime<Utc>) -> Result<(), PromoCodeError> {
        if let Some(code) = &self.code {
            let key = PromoCodeKey::normalize(code)?;
            if key != promo.code {
                return Err(PromoCodeError::RenameNotSupported);
            }
        }

        let mut next = promo.clone();
        if let Some(pct) = self.discount_percentage {
            next.discount_percentage = pct;
        }
        if let Some(description) = &self.description {
            next.description.clone_from(description);
        }
        if let Some(valid_from) = self.valid_from {
            next.valid_from = valid_from;
        }
        if let Some(valid_until) = self.valid_until {
            next.valid_until = valid_until;
        }
        if let Some(usage_limit) = self.usage_limit {
            next.usage_limit = usage_limit;
        }
        if let Some(plans) = &self.applicable_plans {
            let mut plans = plans.clone();
            plans.sort();
            plans.dedup();
            next.applicable_plans = plans;
        }
        if let Some(is_active) = self.is_active {
            next.is_active = is_active;
        }
        next.validate_fields()?;
        next.updated_at = now;
        *promo = next;
        Ok(())
    }
}

/// Errors in admin-supplied promo code data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromoCodeError {
    /// The code contains characters other than letters, digits, and dashes.
    #[error("invalid promo code '{0}': use letters, numbers and dashes only")]
    InvalidCode(String),

    /// The discount is outside 1-100.
    #[error("discount percentage must be between 1 and 100, got {0}")]
    InvalidDiscount(u8),

    /// `valid_from` is after `valid_until`.
    #[error("valid_from must not be after valid_until")]
    InvalidWindow,

    /// A usage limit of zero.
    #[error("usage limit must be at least 1")]
    InvalidUsageLimit,

    /// An update tried to change the code itself.
    #[error("promo codes cannot be renamed; create a new code instead")]
    RenameNotSupported,
}

// ============================================================================
// Validation outcome
// ============================================================================

/// Why a code cannot be used, in check order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoCodeRejection {
    /// No code with this key (or the input is not a well-formed code).
    NotFound,
    /// The code has been switched off.
    Inactive,
    /// The window has not started yet.
    NotYetValid {
        /// Start of the window.
        valid_from: DateTime<Utc>,
    },
    /// The window has ended.
    Expired,
    /// The usage limit has been reached.
    LimitReached,
    /// The user already redeemed this code.
    AlreadyUsed,
    /// The code does not cover the requested plan.
    PlanNotApplicable {
        /// Plans the code does cover.
        applicable_plans: Vec<Plan>,
    },
}

impl PromoCodeRejection {
    /// Stable machine-readable reason.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Inactive => "inactive",
            Self::NotYetValid { .. } => "not_yet_valid",
            Self::Expired => "expired",
            Self::LimitReached => "limit_reached",
            Self::AlreadyUsed => "already_used",
            Self::PlanNotApplicable { .. } => "plan_not_applicable",
        }
    }

    /// Message suitable for showing to the student.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound => "Promo code not found".to_string(),
            Self::Inactive => "This promo code is no longer active".to_string(),
            Self::NotYetValid { valid_from } => format!(
                "Promo code will be valid from {}",
                valid_from.format("%Y-%m-%d")
            ),
            Self::Expired => "This promo code has expired".to_string(),
            Self::LimitReached => "This promo code has reached its usage limit".to_string(),
            Self::AlreadyUsed => "You have already used this promo code".to_string(),
            Self::PlanNotApplicable { applicable_plans } => {
                let plans = applicable_plans
                    .iter()
                    .map(|p| p.display_name())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("This code is only valid for: {plans}")
            }
        }
    }
}

impl fmt::Display for PromoCodeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Result of validating a code for a user and plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoCodeValidation {
    /// The code can be redeemed.
    Valid(PromoCode),
    /// The code cannot be redeemed.
    Invalid(PromoCodeRejection),
}

impl PromoCodeValidation {
    /// Whether the code was accepted.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// The rejection, if any.
    #[must_use]
    pub const fn rejection(&self) -> Option<&PromoCodeRejection> {
        match self {
            Self::Valid(_) => None,
            Self::Invalid(reason) => Some(reason),
        }
    }
}

// ============================================================================
// Redemption receipts
// ============================================================================

/// Immutable record of one user redeeming one code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoCodeUsage {
    /// Receipt identifier (time-ordered).
    pub id: UsageId,

    /// The redeemed code.
    pub code: PromoCodeKey,

    /// The redeeming user.
    pub user_id: UserId,

    /// Display name at redemption time.
    pub user_name: Option<String>,

    /// Email at redemption time.
    pub user_email: Option<String>,

    /// Plan the code was redeemed for.
    pub plan: Plan,

    /// Discount granted.
    pub discount_percentage: u8,

    /// When the code was redeemed.
    pub applied_at: DateTime<Utc>,
}

/// Aggregate usage of one code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoCodeStats {
    /// The code.
    pub code: PromoCodeKey,

    /// Number of redemptions.
    pub total_usage: u64,

    /// Redemptions broken down by plan.
    pub usage_by_plan: BTreeMap<Plan, u64>,

    /// Remaining redemptions, `None` when unlimited.
    pub remaining_uses: Option<u32>,
}

impl PromoCodeStats {
    /// Aggregate receipts for `promo`.
    #[must_use]
    pub fn from_usages(promo: &PromoCode, usages: &[PromoCodeUsage]) -> Self {
        let mut usage_by_plan = BTreeMap::new();
        for usage in usages {
            *usage_by_plan.entry(usage.plan).or_insert(0) += 1;
        }
        Self {
            code: promo.code.clone(),
            total_usage: usages.len() as u64,
            usage_by_plan,
            remaining_uses: promo.remaining_uses(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn promo(now: DateTime<Utc>) -> PromoCode {
        NewPromoCode {
            code: "save20".to_string(),
            discount_percentage: 20,
            description: None,
            valid_from: None,
            valid_until: None,
            usage_limit: Some(2),
            applicable_plans: vec![],
            is_active: true,
        }
        .into_promo_code(None, now)
        .unwrap()
    }

    #[test]
    fn code_key_normalizes_case_and_whitespace() {
        let key = PromoCodeKey::normalize("  save-20 ").unwrap();
        assert_eq!(key.as_str(), "SAVE-20");
    }

    #[test]
    fn code_key_rejects_bad_characters() {
        assert!(PromoCodeKey::normalize("SAVE 20").is_err());
        assert!(PromoCodeKey::normalize("SAVE_20").is_err());
        assert!(PromoCodeKey::normalize("   ").is_err());
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let now = Utc::now();
        let mut p = promo(now);
        p.valid_from = Some(now);
        p.valid_until = Some(now);
        assert_eq!(p.check_availability(now), Ok(()));
        assert_eq!(
            p.check_availability(now - Duration::seconds(1)),
            Err(PromoCodeRejection::NotYetValid { valid_from: now })
        );
        assert_eq!(
            p.check_availability(now + Duration::seconds(1)),
            Err(PromoCodeRejection::Expired)
        );
    }

    #[test]
    fn inactive_is_checked_before_window() {
        let now = Utc::now();
        let mut p = promo(now);
        p.is_active = false;
        p.valid_until = Some(now - Duration::days(1));
        assert_eq!(p.check_availability(now), Err(PromoCodeRejection::Inactive));
    }

    #[test]
    fn usage_limit_reached() {
        let now = Utc::now();
        let mut p = promo(now);
        p.usage_count = 2;
        assert_eq!(p.check_availability(now), Err(PromoCodeRejection::LimitReached));
        assert_eq!(p.remaining_uses(), Some(0));
    }

    #[test]
    fn empty_plan_list_applies_to_all() {
        let p = promo(Utc::now());
        for plan in Plan::ALL {
            assert!(p.check_plan(plan).is_ok());
        }
    }

    #[test]
    fn restricted_plans_reject_others() {
        let mut p = promo(Utc::now());
        p.applicable_plans = vec![Plan::Premium];
        let rejection = p.check_plan(Plan::Basic).unwrap_err();
        assert_eq!(rejection.code(), "plan_not_applicable");
        assert_eq!(rejection.user_message(), "This code is only valid for: Premium");
    }

    #[test]
    fn new_promo_code_validation() {
        let now = Utc::now();
        let base = NewPromoCode {
            code: "X".to_string(),
            discount_percentage: 0,
            description: None,
            valid_from: None,
            valid_until: None,
            usage_limit: None,
            applicable_plans: vec![],
            is_active: true,
        };
        assert_eq!(
            base.clone().into_promo_code(None, now).unwrap_err(),
            PromoCodeError::InvalidDiscount(0)
        );

        let mut window = base.clone();
        window.discount_percentage = 10;
        window.valid_from = Some(now);
        window.valid_until = Some(now - Duration::days(1));
        assert_eq!(
            window.into_promo_code(None, now).unwrap_err(),
            PromoCodeError::InvalidWindow
        );
    }

    #[test]
    fn update_keeps_usage_count_and_rejects_rename() {
        let now = Utc::now();
        let mut p = promo(now);
        p.usage_count = 1;

        let update = PromoCodeUpdate {
            discount_percentage: Some(30),
            usage_limit: Some(None),
            ..PromoCodeUpdate::default()
        };
        update.apply_to(&mut p, now).unwrap();
        assert_eq!(p.discount_percentage, 30);
        assert_eq!(p.usage_limit, None);
        assert_eq!(p.usage_count, 1);

        let rename = PromoCodeUpdate {
            code: Some("OTHER".to_string()),
            ..PromoCodeUpdate::default()
        };
        assert_eq!(
            rename.apply_to(&mut p, now).unwrap_err(),
            PromoCodeError::RenameNotSupported
        );
    }

    #[test]
    fn invalid_update_leaves_code_unchanged() {
        let now = Utc::now();
        let mut p = promo(now);
        let update = PromoCodeUpdate {
            discount_percentage: Some(0),
            is_active: Some(false),
            ..PromoCodeUpdate::default()
        };
        assert!(update.apply_to(&mut p, now).is_err());
        assert!(p.is_active);
        assert_eq!(p.discount_percentage, 20);
    }

    #[test]
    fn update_distinguishes_null_from_absent() {
        let update: PromoCodeUpdate =
            serde_json::from_str(r#"{"description": null, "discount_percentage": 5}"#).unwrap();
        assert_eq!(update.description, Some(None));
        assert_eq!(update.valid_until, None);
    }

    #[test]
    fn stats_group_by_plan() {
        let now = Utc::now();
        let p = promo(now);
        let usage = |plan| PromoCodeUsage {
            id: UsageId::generate(),
            code: p.code.clone(),
            user_id: UserId::generate(),
            user_name: None,
            user_email: None,
            plan,
            discount_percentage: 20,
            applied_at: now,
        };
        let stats = PromoCodeStats::from_usages(
            &p,
            &[usage(Plan::Basic), usage(Plan::Premium), usage(Plan::Premium)],
        );
        assert_eq!(stats.total_usage, 3);
        assert_eq!(stats.usage_by_plan.get(&Plan::Premium), Some(&2));
    }
}
