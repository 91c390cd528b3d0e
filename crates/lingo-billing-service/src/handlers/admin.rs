//! Admin handlers: promo code management and maintenance.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use lingo_billing_core::{NewPromoCode, Plan, PromoCode, PromoCodeStats, PromoCodeUpdate};

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::handlers::promo_codes::{ListUsageResponse, UsageResponse};
use crate::reconciler::ExpirySummary;
use crate::state::AppState;

// ============================================================================
// Responses
// ============================================================================

/// Full promo code as seen by admins.
#[derive(Debug, Serialize)]
pub struct PromoCodeResponse {
    /// Normalized code.
    pub code: String,
    /// Discount percentage.
    pub discount_percentage: u8,
    /// Description.
    pub description: Option<String>,
    /// Window start.
    pub valid_from: Option<String>,
    /// Window end.
    pub valid_until: Option<String>,
    /// Redemption cap.
    pub usage_limit: Option<u32>,
    /// Redemptions so far.
    pub usage_count: u32,
    /// Plans covered (empty = all).
    pub applicable_plans: Vec<Plan>,
    /// Active flag.
    pub is_active: bool,
    /// Admin who created the code.
    pub created_by: Option<String>,
    /// Creation time.
    pub created_at: String,
    /// Last update time.
    pub updated_at: String,
}

impl From<&PromoCode> for PromoCodeResponse {
    fn from(promo: &PromoCode) -> Self {
        Self {
            code: promo.code.to_string(),
            discount_percentage: promo.discount_percentage,
            description: promo.description.clone(),
            valid_from: promo.valid_from.map(|t| t.to_rfc3339()),
            valid_until: promo.valid_until.map(|t| t.to_rfc3339()),
            usage_limit: promo.usage_limit,
            usage_count: promo.usage_count,
            applicable_plans: promo.applicable_plans.clone(),
            is_active: promo.is_active,
            created_by: promo.created_by.clone(),
            created_at: promo.created_at.to_rfc3339(),
            updated_at: promo.updated_at.to_rfc3339(),
        }
    }
}

/// Promo code list response.
#[derive(Debug, Serialize)]
pub struct ListPromoCodesResponse {
    /// Codes, newest first.
    pub promo_codes: Vec<PromoCodeResponse>,
}

// ============================================================================
// Promo codes
// ============================================================================

/// Query parameters for listing codes.
#[derive(Debug, Deserialize)]
pub struct ListPromoCodesQuery {
    /// Only return active codes.
    #[serde(default)]
    pub active_only: bool,
}

/// List all promo codes.
pub async fn list_promo_codes(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Query(query): Query<ListPromoCodesQuery>,
) -> Result<Json<ListPromoCodesResponse>, ApiError> {
    let codes = state.promo.list(query.active_only)?;
    Ok(Json(ListPromoCodesResponse {
        promo_codes: codes.iter().map(PromoCodeResponse::from).collect(),
    }))
}

/// Create a promo code.
pub async fn create_promo_code(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<NewPromoCode>,
) -> Result<Json<PromoCodeResponse>, ApiError> {
    let promo = state
        .promo
        .create(body, Some(admin.admin_id), Utc::now())?;
    Ok(Json(PromoCodeResponse::from(&promo)))
}

/// Get a promo code.
pub async fn get_promo_code(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(code): Path<String>,
) -> Result<Json<PromoCodeResponse>, ApiError> {
    let promo = state.promo.get(&code)?;
    Ok(Json(PromoCodeResponse::from(&promo)))
}

/// Edit a promo code.
pub async fn update_promo_code(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(code): Path<String>,
    Json(body): Json<PromoCodeUpdate>,
) -> Result<Json<PromoCodeResponse>, ApiError> {
    let promo = state.promo.update(&code, &body, Utc::now())?;
    tracing::info!(code = %promo.code, admin_id = %admin.admin_id, "Promo code updated");
    Ok(Json(PromoCodeResponse::from(&promo)))
}

/// Status change request.
#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    /// New active flag.
    pub is_active: bool,
}

/// Activate or deactivate a promo code.
pub async fn set_promo_code_status(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(code): Path<String>,
    Json(body): Json<SetStatusRequest>,
) -> Result<Json<PromoCodeResponse>, ApiError> {
    let promo = state.promo.set_active(&code, body.is_active, Utc::now())?;
    tracing::info!(
        code = %promo.code,
        is_active = promo.is_active,
        admin_id = %admin.admin_id,
        "Promo code status changed"
    );
    Ok(Json(PromoCodeResponse::from(&promo)))
}

/// Soft-delete a promo code (deactivates it; receipts are kept).
pub async fn delete_promo_code(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(code): Path<String>,
) -> Result<Json<PromoCodeResponse>, ApiError> {
    let promo = state.promo.soft_delete(&code, Utc::now())?;
    tracing::info!(code = %promo.code, admin_id = %admin.admin_id, "Promo code deactivated");
    Ok(Json(PromoCodeResponse::from(&promo)))
}

/// Permanently delete a promo code.
pub async fn delete_promo_code_permanently(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(code): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.promo.delete_permanently(&code)?;
    tracing::info!(code = %code, admin_id = %admin.admin_id, "Promo code deleted");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// List redemptions of a code.
pub async fn list_promo_code_usage(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(code): Path<String>,
) -> Result<Json<ListUsageResponse>, ApiError> {
    let usage = state.promo.usage_for_code(&code)?;
    Ok(Json(ListUsageResponse {
        usage: usage.iter().map(UsageResponse::from).collect(),
    }))
}

/// Usage statistics for a code.
pub async fn promo_code_stats(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(code): Path<String>,
) -> Result<Json<PromoCodeStats>, ApiError> {
    Ok(Json(state.promo.stats(&code)?))
}

// ============================================================================
// Maintenance
// ============================================================================

/// Expire lapsed subscriptions and send renewal reminders.
pub async fn expire_subscriptions(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
) -> Result<Json<ExpirySummary>, ApiError> {
    let summary = state.reconciler.expire_lapsed(Utc::now()).await?;
    tracing::info!(
        admin_id = %admin.admin_id,
        expired = summary.expired,
        reminded = summary.reminded,
        "Expiry sweep triggered"
    );
    Ok(Json(summary))
}
