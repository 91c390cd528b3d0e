//! Application state.

use std::sync::Arc;

use lingo_billing_store::Store;

use crate::auth::IdentityKeys;
use crate::config::ServiceConfig;
use crate::mailer::{EmailJsMailer, Mailer};
use crate::promo::PromoCodeEngine;
use crate::reconciler::SubscriptionReconciler;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Email transport (optional).
    pub mailer: Option<Arc<dyn Mailer>>,

    /// Identity provider signing keys.
    pub identity_keys: Arc<IdentityKeys>,

    /// Promo code validation and redemption.
    pub promo: PromoCodeEngine,

    /// Billing event processing.
    pub reconciler: SubscriptionReconciler,
}

impl AppState {
    /// Create a new application state, building the EmailJS mailer if configured.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let mailer = config.emailjs.clone().and_then(|emailjs| {
            match EmailJsMailer::new(emailjs) {
                Ok(mailer) => {
                    tracing::info!("EmailJS integration enabled");
                    Some(Arc::new(mailer) as Arc<dyn Mailer>)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create EmailJS client");
                    None
                }
            }
        });

        if mailer.is_none() {
            tracing::warn!("EmailJS not configured - billing emails will not be sent");
        }

        Self::with_mailer(store, config, mailer)
    }

    /// Create a new application state with an explicit mailer.
    #[must_use]
    pub fn with_mailer(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        mailer: Option<Arc<dyn Mailer>>,
    ) -> Self {
        if config.allow_test_tokens {
            tracing::warn!("Test tokens are accepted - never enable this in production");
        }
        if config.paddle_webhook_secret.is_none() {
            tracing::warn!("Paddle webhook secret not configured - Paddle webhooks will be refused");
        }
        if config.tap_secret_key.is_none() {
            tracing::warn!("Tap secret key not configured - Tap webhooks will be refused");
        }

        let identity_keys = Arc::new(IdentityKeys::new(config.auth_jwks_url.clone()));
        let promo = PromoCodeEngine::new(Arc::clone(&store), config.admin_user_ids.clone());
        let reconciler =
            SubscriptionReconciler::new(Arc::clone(&store), mailer.clone(), config.app_url.clone());

        Self {
            store,
            config,
            mailer,
            identity_keys,
            promo,
            reconciler,
        }
    }
}
