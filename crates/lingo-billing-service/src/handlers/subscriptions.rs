//! Subscription status and test-mode activation handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lingo_billing_core::{
    AppliedPromoCode, BillingAccount, BillingEvent, BillingEventKind, PaymentProvider, Plan,
    Subscription, SubscriptionStatus, PLAN_CURRENCY,
};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::promo::Redeemer;
use crate::reconciler::ReconcileOutcome;
use crate::state::AppState;

/// A subscription as returned to the student.
#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    /// Plan.
    pub plan: Plan,
    /// Status.
    pub status: SubscriptionStatus,
    /// Start of the subscription record.
    pub start_date: String,
    /// End of the paid period.
    pub end_date: String,
    /// Whether it ends at `end_date` instead of renewing.
    pub cancel_at_period_end: bool,
    /// Discount on the last payment.
    pub discount_percentage: u8,
    /// Promo code on the last payment.
    pub applied_promo_code: Option<String>,
    /// Last amount paid, in minor units.
    pub amount_cents: i64,
    /// Currency of `amount_cents`.
    pub currency: String,
}

impl From<&Subscription> for SubscriptionView {
    fn from(sub: &Subscription) -> Self {
        Self {
            plan: sub.plan,
            status: sub.status,
            start_date: sub.start_date.to_rfc3339(),
            end_date: sub.end_date.to_rfc3339(),
            cancel_at_period_end: sub.cancel_at_period_end,
            discount_percentage: sub.discount_percentage,
            applied_promo_code: sub.applied_promo_code.as_ref().map(ToString::to_string),
            amount_cents: sub.amount_cents,
            currency: sub.currency.clone(),
        }
    }
}

/// Most recently redeemed promo code.
#[derive(Debug, Serialize)]
pub struct AppliedPromoView {
    /// Code.
    pub code: String,
    /// Discount granted.
    pub discount_percentage: u8,
    /// Redemption time.
    pub applied_at: String,
}

impl From<&AppliedPromoCode> for AppliedPromoView {
    fn from(promo: &AppliedPromoCode) -> Self {
        Self {
            code: promo.code.to_string(),
            discount_percentage: promo.discount_percentage,
            applied_at: promo.applied_at.to_rfc3339(),
        }
    }
}

/// Subscription status response.
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    /// Whether the student currently has access to paid content.
    pub has_access: bool,
    /// Current subscription, if any.
    pub subscription: Option<SubscriptionView>,
    /// Most recently redeemed promo code.
    pub applied_promo: Option<AppliedPromoView>,
}

impl SubscriptionResponse {
    fn from_account(account: Option<&BillingAccount>, now: DateTime<Utc>) -> Self {
        let subscription = account.and_then(|a| a.subscription.as_ref());
        Self {
            has_access: subscription.is_some_and(|s| s.grants_access(now)),
            subscription: subscription.map(SubscriptionView::from),
            applied_promo: account
                .and_then(|a| a.applied_promo.as_ref())
                .map(AppliedPromoView::from),
        }
    }
}

/// Get the caller's subscription.
///
/// Also records the caller's email and name, so provider webhooks for this
/// user can send billing emails.
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let now = Utc::now();
    let account = remember_contact(&state, &auth, now)?;
    Ok(Json(SubscriptionResponse::from_account(account.as_ref(), now)))
}

/// Test-mode activation request.
#[derive(Debug, Deserialize)]
pub struct TestActivateRequest {
    /// Plan to activate.
    pub plan: Plan,
    /// Promo code to redeem first.
    #[serde(default)]
    pub promo_code: Option<String>,
}

/// Test-mode activation response.
#[derive(Debug, Serialize)]
pub struct TestActivateResponse {
    /// What the reconciler did with the simulated payment.
    pub outcome: ReconcileOutcome,
    /// Amount "charged", in cents.
    pub amount_cents: i64,
    /// Subscription after activation.
    #[serde(flatten)]
    pub subscription: SubscriptionResponse,
}

/// Activate a subscription without a payment provider.
///
/// Simulates a completed payment through the same reconciliation path as
/// provider webhooks.
pub async fn test_activate(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<TestActivateRequest>,
) -> Result<Json<TestActivateResponse>, ApiError> {
    if !state.config.test_mode_enabled() {
        return Err(ApiError::Forbidden("test-mode activation is disabled".into()));
    }

    let now = Utc::now();
    remember_contact(&state, &auth, now)?;

    let (discount_percentage, amount_cents) = match body.promo_code.as_deref() {
        Some(code) => {
            let redeemer = Redeemer {
                user_id: auth.user_id.clone(),
                name: auth.name.clone(),
                email: auth.email.clone(),
            };
            let redemption = state.promo.redeem(code, redeemer, body.plan, now)?;
            (
                redemption.usage.discount_percentage,
                redemption.price.final_cents,
            )
        }
        None => (0, body.plan.monthly_price_cents()),
    };

    let transaction_id = format!("test:{}:{}", auth.user_id, now.timestamp_millis());
    let event = BillingEvent {
        event_id: transaction_id.clone(),
        provider: PaymentProvider::Manual,
        occurred_at: now,
        user_id: Some(auth.user_id.clone()),
        kind: BillingEventKind::PaymentCompleted {
            customer_id: None,
            transaction_id,
            plan: body.plan,
            amount_cents,
            currency: PLAN_CURRENCY.to_string(),
            discount_percentage,
            receipt_url: None,
        },
    };

    let outcome = state.reconciler.process_at(&event, now).await?;
    tracing::info!(
        user_id = %auth.user_id,
        plan = %body.plan,
        amount_cents,
        outcome = outcome.as_str(),
        "Test-mode subscription activation"
    );

    let account = state.store.get_account(&auth.user_id)?;
    Ok(Json(TestActivateResponse {
        outcome,
        amount_cents,
        subscription: SubscriptionResponse::from_account(account.as_ref(), now),
    }))
}

/// Record the caller's email and name on their account so billing emails can
/// reach them. Returns the account.
fn remember_contact(
    state: &AppState,
    auth: &AuthUser,
    now: DateTime<Utc>,
) -> Result<Option<BillingAccount>, ApiError> {
    if auth.email.is_none() && auth.name.is_none() {
        return Ok(state.store.get_account(&auth.user_id)?);
    }
    let account = state.store.record_contact(
        &auth.user_id,
        auth.email.as_deref(),
        auth.name.as_deref(),
        now,
    )?;
    Ok(Some(account))
}
