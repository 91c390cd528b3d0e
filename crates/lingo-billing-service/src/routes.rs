//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    admin, health, notifications, payments, plans, promo_codes, subscriptions, webhooks,
};
use crate::state::AppState;

/// Maximum concurrent requests for API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/plans` - Plan catalogue
///
/// ## Promo codes (JWT auth)
/// - `POST /v1/promo-codes/validate` - Check a code for a plan
/// - `POST /v1/promo-codes/redeem` - Redeem a code
/// - `GET /v1/promo-codes/available` - Codes open for redemption
/// - `GET /v1/promo-codes/usage` - Caller's redemptions
///
/// ## Subscription (JWT auth)
/// - `GET /v1/subscription` - Current subscription
/// - `POST /v1/subscription/test-activate` - Activate without a provider (test mode)
/// - `GET /v1/payments` - Payment history
/// - `GET /v1/notifications` - In-app notifications
/// - `POST /v1/notifications/:id/read` - Mark a notification read
///
/// ## Admin (Admin API key)
/// - `GET|POST /v1/admin/promo-codes`
/// - `GET|PATCH|DELETE /v1/admin/promo-codes/:code`
/// - `POST /v1/admin/promo-codes/:code/status`
/// - `DELETE /v1/admin/promo-codes/:code/permanent`
/// - `GET /v1/admin/promo-codes/:code/usage`
/// - `GET /v1/admin/promo-codes/:code/stats`
/// - `POST /v1/admin/subscriptions/expire` - Expiry sweep
///
/// ## Webhooks (Signature verification)
/// - `POST /webhooks/paddle` - Paddle Billing notifications
/// - `POST /webhooks/tap` - Tap charge callbacks
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let admin_routes = Router::new()
        .route(
            "/promo-codes",
            get(admin::list_promo_codes).post(admin::create_promo_code),
        )
        .route(
            "/promo-codes/:code",
            get(admin::get_promo_code)
                .patch(admin::update_promo_code)
                .delete(admin::delete_promo_code),
        )
        .route("/promo-codes/:code/status", post(admin::set_promo_code_status))
        .route(
            "/promo-codes/:code/permanent",
            delete(admin::delete_promo_code_permanently),
        )
        .route("/promo-codes/:code/usage", get(admin::list_promo_code_usage))
        .route("/promo-codes/:code/stats", get(admin::promo_code_stats))
        .route("/subscriptions/expire", post(admin::expire_subscriptions));

    let api_routes = Router::new()
        .route("/plans", get(plans::list_plans))
        // Promo codes
        .route("/promo-codes/validate", post(promo_codes::validate_promo_code))
        .route("/promo-codes/redeem", post(promo_codes::redeem_promo_code))
        .route("/promo-codes/available", get(promo_codes::list_available))
        .route("/promo-codes/usage", get(promo_codes::list_my_usage))
        // Subscription
        .route("/subscription", get(subscriptions::get_subscription))
        .route("/subscription/test-activate", post(subscriptions::test_activate))
        .route("/payments", get(payments::list_payments))
        // Notifications
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/:id/read", post(notifications::mark_read))
        .nest("/admin", admin_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by the providers)
        .route("/webhooks/paddle", post(webhooks::paddle_webhook))
        .route("/webhooks/tap", post(webhooks::tap_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_skips_unparsable_origins() {
        // Building must not panic on junk entries
        let _layer = build_cors_layer(&["https://app.lingo.test".into(), "\n".into()]);
        let _any = build_cors_layer(&["*".into()]);
    }
}
