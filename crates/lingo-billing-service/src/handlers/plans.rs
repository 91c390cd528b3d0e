//! Plan catalog handler.

use axum::Json;
use serde::Serialize;

use lingo_billing_core::{Plan, PLAN_CURRENCY};

/// One plan in the catalog.
#[derive(Debug, Serialize)]
pub struct PlanResponse {
    /// Plan identifier.
    pub plan: Plan,
    /// Display name.
    pub name: String,
    /// Monthly list price in cents.
    pub monthly_price_cents: i64,
    /// Price currency.
    pub currency: String,
}

/// Plan catalog response.
#[derive(Debug, Serialize)]
pub struct ListPlansResponse {
    /// Plans, cheapest first.
    pub plans: Vec<PlanResponse>,
}

/// List the plan catalog.
pub async fn list_plans() -> Json<ListPlansResponse> {
    let plans = Plan::ALL
        .iter()
        .map(|plan| PlanResponse {
            plan: *plan,
            name: plan.display_name().to_string(),
            monthly_price_cents: plan.monthly_price_cents(),
            currency: PLAN_CURRENCY.to_string(),
        })
        .collect();

    Json(ListPlansResponse { plans })
}
