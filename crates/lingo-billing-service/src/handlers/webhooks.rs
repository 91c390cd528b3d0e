//! Webhook handlers for Paddle and Tap.
//!
//! Both providers retry on non-2xx responses. Authentication failures and
//! unreadable envelopes are refused; events that are authentic but cannot be
//! acted on are acknowledged so the provider stops retrying.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use lingo_billing_core::{BillingEvent, PaymentProvider};

use crate::error::{ApiError, WebhookError};
use crate::paddle;
use crate::reconciler::ReconcileOutcome;
use crate::state::AppState;
use crate::tap;

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
    /// What billing did with it.
    pub outcome: ReconcileOutcome,
}

impl WebhookResponse {
    fn ack(outcome: ReconcileOutcome) -> Json<Self> {
        Json(Self {
            received: true,
            outcome,
        })
    }
}

/// Handle Paddle webhooks.
pub async fn paddle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let secret = state.config.paddle_webhook_secret.as_deref().ok_or_else(|| {
        tracing::error!("Paddle webhook received but no secret is configured");
        ApiError::ServiceUnavailable("Paddle webhooks are not configured".into())
    })?;

    let signature = headers
        .get(paddle::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    paddle::verify_signature(
        secret,
        signature,
        &body,
        Utc::now(),
        state.config.webhook_tolerance_seconds,
    )
    .map_err(|e| reject(PaymentProvider::Paddle, e))?;

    let event = match paddle::parse_event(&body) {
        Ok(event) => event,
        Err(e) => return acknowledge_or_reject(PaymentProvider::Paddle, e),
    };

    dispatch(&state, PaymentProvider::Paddle, event).await
}

/// Handle Tap charge webhooks.
pub async fn tap_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let secret = state.config.tap_secret_key.as_deref().ok_or_else(|| {
        tracing::error!("Tap webhook received but no secret key is configured");
        ApiError::ServiceUnavailable("Tap webhooks are not configured".into())
    })?;

    // Tap signs fields of the charge, so it must be parsed before verification
    let charge = tap::parse_charge(&body).map_err(|e| reject(PaymentProvider::Tap, e))?;

    let signature = headers
        .get(tap::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    tap::verify_hashstring(secret, signature, &charge)
        .map_err(|e| reject(PaymentProvider::Tap, e))?;

    let event = match tap::charge_event(charge, Utc::now()) {
        Ok(event) => event,
        Err(e) => return acknowledge_or_reject(PaymentProvider::Tap, e),
    };

    dispatch(&state, PaymentProvider::Tap, event).await
}

async fn dispatch(
    state: &AppState,
    provider: PaymentProvider,
    event: Option<BillingEvent>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let Some(event) = event else {
        return Ok(WebhookResponse::ack(ReconcileOutcome::Ignored));
    };

    tracing::info!(
        provider = %provider,
        event_id = %event.event_id,
        kind = event.kind.name(),
        "Received billing webhook"
    );

    let outcome = state.reconciler.process(&event).await.map_err(|e| {
        tracing::error!(
            provider = %provider,
            event_id = %event.event_id,
            error = %e,
            "Failed to process billing event"
        );
        ApiError::from(e)
    })?;

    Ok(WebhookResponse::ack(outcome))
}

fn reject(provider: PaymentProvider, err: WebhookError) -> ApiError {
    tracing::warn!(provider = %provider, error = %err, "Rejected webhook");
    err.into()
}

fn acknowledge_or_reject(
    provider: PaymentProvider,
    err: WebhookError,
) -> Result<Json<WebhookResponse>, ApiError> {
    if err.is_rejection() {
        return Err(reject(provider, err));
    }
    tracing::warn!(provider = %provider, error = %err, "Acknowledging uninterpretable webhook");
    Ok(WebhookResponse::ack(ReconcileOutcome::Ignored))
}
