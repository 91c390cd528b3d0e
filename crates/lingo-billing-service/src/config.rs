//! Service configuration.

use serde::Deserialize;
use std::path::Path;

use lingo_billing_core::UserId;

/// Default issuer prefix for auth provider ID tokens.
const DEFAULT_AUTH_PROJECT: &str = "lingo-platform";

/// Default JWKS endpoint for auth provider ID tokens.
const DEFAULT_AUTH_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Default EmailJS REST endpoint.
const DEFAULT_EMAILJS_BASE_URL: &str = "https://api.emailjs.com";

/// EmailJS credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailJsConfig {
    /// EmailJS service ID.
    pub service_id: String,

    /// EmailJS template ID used for all billing emails.
    pub template_id: String,

    /// EmailJS public key (sent as `user_id`).
    pub public_key: String,

    /// EmailJS private key (sent as `accessToken`), required for server-side calls
    /// when strict mode is enabled on the account.
    #[serde(default)]
    pub private_key: Option<String>,

    /// REST API base URL.
    #[serde(default = "default_emailjs_base_url")]
    pub base_url: String,
}

fn default_emailjs_base_url() -> String {
    DEFAULT_EMAILJS_BASE_URL.to_string()
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/lingo-billing").
    pub data_dir: String,

    /// JWKS URL of the auth provider.
    pub auth_jwks_url: String,

    /// Expected JWT issuer.
    pub auth_issuer: String,

    /// Expected JWT audience.
    pub auth_audience: String,

    /// Accept `Bearer test-token:<user_id>` tokens. Never enable in production.
    pub allow_test_tokens: bool,

    /// Admin API key for privileged endpoints.
    pub admin_api_key: Option<String>,

    /// Users notified when a promo code is redeemed.
    pub admin_user_ids: Vec<UserId>,

    /// Paddle webhook secret key (optional; Paddle webhooks are refused without it).
    pub paddle_webhook_secret: Option<String>,

    /// Tap secret key (optional; Tap webhooks are refused without it).
    pub tap_secret_key: Option<String>,

    /// Maximum age of a signed webhook timestamp, in seconds.
    pub webhook_tolerance_seconds: i64,

    /// Force test-mode subscription activation.
    pub payment_test_mode: bool,

    /// EmailJS credentials (optional; emails are skipped without them).
    pub emailjs: Option<EmailJsConfig>,

    /// Frontend URL used in email links.
    pub app_url: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Paddle secrets file structure.
#[derive(Debug, Deserialize)]
struct PaddleSecrets {
    webhook_secret: String,
}

/// Tap secrets file structure.
#[derive(Debug, Deserialize)]
struct TapSecrets {
    secret_key: String,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let auth_project =
            std::env::var("AUTH_PROJECT_ID").unwrap_or_else(|_| DEFAULT_AUTH_PROJECT.into());

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/lingo-billing".into()),
            auth_jwks_url: std::env::var("AUTH_JWKS_URL")
                .unwrap_or_else(|_| DEFAULT_AUTH_JWKS_URL.into()),
            auth_issuer: std::env::var("AUTH_ISSUER")
                .unwrap_or_else(|_| format!("https://securetoken.google.com/{auth_project}")),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(auth_project),
            allow_test_tokens: env_flag("AUTH_ALLOW_TEST_TOKENS"),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            admin_user_ids: std::env::var("ADMIN_USER_IDS")
                .unwrap_or_default()
                .split(',')
                .filter_map(|s| {
                    let s = s.trim();
                    if s.is_empty() {
                        return None;
                    }
                    s.parse()
                        .map_err(|_| tracing::warn!(user_id = %s, "Ignoring invalid admin user id"))
                        .ok()
                })
                .collect(),
            paddle_webhook_secret: load_paddle_secret(),
            tap_secret_key: load_tap_secret(),
            webhook_tolerance_seconds: std::env::var("WEBHOOK_TOLERANCE_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            payment_test_mode: env_flag("PAYMENT_TEST_MODE"),
            emailjs: load_emailjs_config(),
            app_url: std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".into()),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024), // 1MB
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        }
    }

    /// Whether test-mode activation is available.
    ///
    /// Enabled explicitly, or implicitly when no payment provider is configured.
    #[must_use]
    pub fn test_mode_enabled(&self) -> bool {
        self.payment_test_mode
            || (self.paddle_webhook_secret.is_none() && self.tap_secret_key.is_none())
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Candidate locations for a secrets file.
fn secret_paths(file: &str) -> [String; 3] {
    [
        format!(".secrets/{file}"),
        format!("lingo-billing/.secrets/{file}"),
        format!("../.secrets/{file}"),
    ]
}

/// Load the Paddle webhook secret from file or environment.
fn load_paddle_secret() -> Option<String> {
    for path in &secret_paths("paddle.json") {
        if let Ok(secrets) = load_secrets_file::<PaddleSecrets>(path) {
            tracing::info!(path = %path, "Loaded Paddle secrets from file");
            return Some(secrets.webhook_secret);
        }
    }

    tracing::debug!("Paddle secrets file not found, using environment variables");
    std::env::var("PADDLE_WEBHOOK_SECRET").ok()
}

/// Load the Tap secret key from file or environment.
fn load_tap_secret() -> Option<String> {
    for path in &secret_paths("tap.json") {
        if let Ok(secrets) = load_secrets_file::<TapSecrets>(path) {
            tracing::info!(path = %path, "Loaded Tap secrets from file");
            return Some(secrets.secret_key);
        }
    }

    tracing::debug!("Tap secrets file not found, using environment variables");
    std::env::var("TAP_SECRET_KEY").ok()
}

/// Load EmailJS credentials from file or environment.
fn load_emailjs_config() -> Option<EmailJsConfig> {
    for path in &secret_paths("emailjs.json") {
        if let Ok(config) = load_secrets_file::<EmailJsConfig>(path) {
            tracing::info!(path = %path, "Loaded EmailJS secrets from file");
            return Some(config);
        }
    }

    tracing::debug!("EmailJS secrets file not found, using environment variables");
    let service_id = std::env::var("EMAILJS_SERVICE_ID").ok()?;
    let template_id = std::env::var("EMAILJS_TEMPLATE_ID").ok()?;
    let public_key = std::env::var("EMAILJS_PUBLIC_KEY").ok()?;
    Some(EmailJsConfig {
        service_id,
        template_id,
        public_key,
        private_key: std::env::var("EMAILJS_PRIVATE_KEY").ok(),
        base_url: std::env::var("EMAILJS_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_EMAILJS_BASE_URL.into()),
    })
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/lingo-billing".into(),
            auth_jwks_url: DEFAULT_AUTH_JWKS_URL.into(),
            auth_issuer: format!("https://securetoken.google.com/{DEFAULT_AUTH_PROJECT}"),
            auth_audience: DEFAULT_AUTH_PROJECT.into(),
            allow_test_tokens: false,
            admin_api_key: None,
            admin_user_ids: Vec::new(),
            paddle_webhook_secret: None,
            tap_secret_key: None,
            webhook_tolerance_seconds: 300,
            payment_test_mode: false,
            emailjs: None,
            app_url: "http://localhost:3000".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_defaults_on_without_providers() {
        let config = ServiceConfig::default();
        assert!(config.test_mode_enabled());
    }

    #[test]
    fn test_mode_off_when_provider_configured() {
        let config = ServiceConfig {
            paddle_webhook_secret: Some("pdl_ntfset_secret".into()),
            ..ServiceConfig::default()
        };
        assert!(!config.test_mode_enabled());

        let forced = ServiceConfig {
            payment_test_mode: true,
            ..config
        };
        assert!(forced.test_mode_enabled());
    }

    #[test]
    fn emailjs_file_defaults_base_url() {
        let config: EmailJsConfig = serde_json::from_str(
            r#"{"service_id":"svc","template_id":"tpl","public_key":"pk"}"#,
        )
        .unwrap();
        assert_eq!(config.base_url, DEFAULT_EMAILJS_BASE_URL);
        assert!(config.private_key.is_none());
    }
}
