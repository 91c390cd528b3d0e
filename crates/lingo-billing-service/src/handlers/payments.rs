//! Payment history handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use lingo_billing_core::{format_amount, PaymentHistoryRecord, PaymentProvider, PaymentStatus};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Payment list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListPaymentsQuery {
    /// Maximum number of payments to return (default: 10).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    10
}

/// Payment record response.
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    /// Record ID.
    pub id: String,
    /// Provider.
    pub provider: PaymentProvider,
    /// Provider transaction ID.
    pub transaction_id: Option<String>,
    /// Amount in minor units.
    pub amount_cents: i64,
    /// Currency.
    pub currency: String,
    /// Amount formatted with its currency, e.g. "49.00 USD".
    pub amount_formatted: String,
    /// Outcome.
    pub status: PaymentStatus,
    /// Description.
    pub description: String,
    /// Receipt link.
    pub receipt_url: Option<String>,
    /// Timestamp.
    pub created_at: String,
}

impl From<&PaymentHistoryRecord> for PaymentResponse {
    fn from(record: &PaymentHistoryRecord) -> Self {
        Self {
            id: record.id.to_string(),
            provider: record.provider,
            transaction_id: record.transaction_id.clone(),
            amount_cents: record.amount_cents,
            currency: record.currency.clone(),
            amount_formatted: format_amount(record.amount_cents, &record.currency),
            status: record.status,
            description: record.description.clone(),
            receipt_url: record.receipt_url.clone(),
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

/// List payments response.
#[derive(Debug, Serialize)]
pub struct ListPaymentsResponse {
    /// Payments (newest first).
    pub payments: Vec<PaymentResponse>,
    /// Whether there are more payments.
    pub has_more: bool,
}

/// List the caller's payment history.
pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<ListPaymentsResponse>, ApiError> {
    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(100);
    let payments = state
        .store
        .list_payments_by_user(&auth.user_id, limit + 1, query.offset)?;

    let has_more = payments.len() > limit;
    let payments: Vec<_> = payments
        .iter()
        .take(limit)
        .map(PaymentResponse::from)
        .collect();

    Ok(Json(ListPaymentsResponse { payments, has_more }))
}
