//! Student-facing promo code handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use lingo_billing_core::{
    discounted_price, DiscountedPrice, Plan, PromoCode, PromoCodeUsage, PromoCodeValidation,
};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::promo::Redeemer;
use crate::state::AppState;

/// Validate/redeem request.
#[derive(Debug, Deserialize)]
pub struct PromoCodeRequest {
    /// Code as typed by the student.
    pub code: String,
    /// Plan being purchased.
    pub plan: Plan,
}

/// Price breakdown for a plan with a discount.
#[derive(Debug, Serialize)]
pub struct PricingResponse {
    /// List price in cents.
    pub original_cents: i64,
    /// Discount in cents.
    pub discount_cents: i64,
    /// Price to pay in cents.
    pub final_cents: i64,
}

impl From<DiscountedPrice> for PricingResponse {
    fn from(price: DiscountedPrice) -> Self {
        Self {
            original_cents: price.original_cents,
            discount_cents: price.discount_cents,
            final_cents: price.final_cents,
        }
    }
}

/// Validation response. Rejections are reported in the body, not as errors.
#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    /// Whether the code can be redeemed.
    pub valid: bool,
    /// Normalized code, when valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Discount percentage, when valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_percentage: Option<u8>,
    /// Code description, when valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Discounted price for the plan, when valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingResponse>,
    /// Machine-readable rejection reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Student-facing rejection message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Check whether a code can be used for a plan.
pub async fn validate_promo_code(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<PromoCodeRequest>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let validation = state.promo.validate(&body.code, &auth.user_id, body.plan)?;

    let response = match validation {
        PromoCodeValidation::Valid(promo) => ValidateResponse {
            valid: true,
            code: Some(promo.code.to_string()),
            discount_percentage: Some(promo.discount_percentage),
            description: promo.description,
            pricing: Some(
                discounted_price(body.plan.monthly_price_cents(), promo.discount_percentage)
                    .into(),
            ),
            error: None,
            message: None,
        },
        PromoCodeValidation::Invalid(reason) => {
            tracing::debug!(
                user_id = %auth.user_id,
                code = %body.code,
                reason = reason.code(),
                "Promo code validation failed"
            );
            ValidateResponse {
                valid: false,
                code: None,
                discount_percentage: None,
                description: None,
                pricing: None,
                error: Some(reason.code().to_string()),
                message: Some(reason.user_message()),
            }
        }
    };

    Ok(Json(response))
}

/// Redemption response.
#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    /// Redeemed code.
    pub code: String,
    /// Discount recorded on the receipt.
    pub discount_percentage: u8,
    /// Plan the code was redeemed for.
    pub plan: Plan,
    /// Discounted price to charge at checkout.
    pub pricing: PricingResponse,
    /// Receipt ID.
    pub usage_id: String,
    /// Redemption time.
    pub applied_at: String,
}

/// Validate and redeem a code in one step.
pub async fn redeem_promo_code(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<PromoCodeRequest>,
) -> Result<Json<RedeemResponse>, ApiError> {
    let redeemer = Redeemer {
        user_id: auth.user_id,
        name: auth.name,
        email: auth.email,
    };
    let redemption = state
        .promo
        .redeem(&body.code, redeemer, body.plan, Utc::now())?;

    Ok(Json(RedeemResponse {
        code: redemption.usage.code.to_string(),
        discount_percentage: redemption.usage.discount_percentage,
        plan: redemption.usage.plan,
        pricing: redemption.price.into(),
        usage_id: redemption.usage.id.to_string(),
        applied_at: redemption.usage.applied_at.to_rfc3339(),
    }))
}

/// A code open for redemption.
#[derive(Debug, Serialize)]
pub struct AvailablePromoCode {
    /// Code.
    pub code: String,
    /// Discount percentage.
    pub discount_percentage: u8,
    /// Description.
    pub description: Option<String>,
    /// End of the validity window.
    pub valid_until: Option<String>,
    /// Plans covered (empty = all).
    pub applicable_plans: Vec<Plan>,
    /// Uses left, if limited.
    pub remaining_uses: Option<u32>,
}

impl From<&PromoCode> for AvailablePromoCode {
    fn from(promo: &PromoCode) -> Self {
        Self {
            code: promo.code.to_string(),
            discount_percentage: promo.discount_percentage,
            description: promo.description.clone(),
            valid_until: promo.valid_until.map(|t| t.to_rfc3339()),
            applicable_plans: promo.applicable_plans.clone(),
            remaining_uses: promo.remaining_uses(),
        }
    }
}

/// Available codes response.
#[derive(Debug, Serialize)]
pub struct ListAvailableResponse {
    /// Codes open for redemption right now.
    pub promo_codes: Vec<AvailablePromoCode>,
}

/// List codes open for redemption.
pub async fn list_available(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> Result<Json<ListAvailableResponse>, ApiError> {
    let codes = state.promo.list_available(Utc::now())?;
    Ok(Json(ListAvailableResponse {
        promo_codes: codes.iter().map(AvailablePromoCode::from).collect(),
    }))
}

/// A redemption receipt.
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    /// Receipt ID.
    pub id: String,
    /// Code redeemed.
    pub code: String,
    /// Plan.
    pub plan: Plan,
    /// Discount percentage.
    pub discount_percentage: u8,
    /// Redeeming user.
    pub user_id: String,
    /// User display name at redemption time.
    pub user_name: Option<String>,
    /// User email at redemption time.
    pub user_email: Option<String>,
    /// Redemption time.
    pub applied_at: String,
}

impl From<&PromoCodeUsage> for UsageResponse {
    fn from(usage: &PromoCodeUsage) -> Self {
        Self {
            id: usage.id.to_string(),
            code: usage.code.to_string(),
            plan: usage.plan,
            discount_percentage: usage.discount_percentage,
            user_id: usage.user_id.to_string(),
            user_name: usage.user_name.clone(),
            user_email: usage.user_email.clone(),
            applied_at: usage.applied_at.to_rfc3339(),
        }
    }
}

/// Receipt list response.
#[derive(Debug, Serialize)]
pub struct ListUsageResponse {
    /// Receipts, newest first.
    pub usage: Vec<UsageResponse>,
}

/// List the caller's own redemptions.
pub async fn list_my_usage(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ListUsageResponse>, ApiError> {
    let usage = state.promo.usage_for_user(&auth.user_id)?;
    Ok(Json(ListUsageResponse {
        usage: usage.iter().map(UsageResponse::from).collect(),
    }))
}
