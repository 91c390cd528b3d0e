//! Health check handler.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// What this instance can currently do.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `ok` while the process serves requests.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Whether `POST /v1/subscription/test-activate` is open.
    pub test_mode: bool,
    /// Providers whose webhooks are accepted (a secret is configured).
    pub payment_providers: Vec<&'static str>,
    /// Whether billing emails are sent.
    pub email_enabled: bool,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let config = &state.config;
    let payment_providers = [
        ("paddle", config.paddle_webhook_secret.is_some()),
        ("tap", config.tap_secret_key.is_some()),
    ]
    .into_iter()
    .filter_map(|(name, configured)| configured.then_some(name))
    .collect();

    Json(HealthResponse {
        status: "ok",
        service: "lingo-billing",
        version: env!("CARGO_PKG_VERSION"),
        test_mode: config.test_mode_enabled(),
        payment_providers,
        email_enabled: state.mailer.is_some(),
    })
}
