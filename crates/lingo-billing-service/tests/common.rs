//! Common test utilities for lingo-billing integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use chrono::Utc;
use tempfile::TempDir;

use lingo_billing_core::UserId;
use lingo_billing_service::crypto::hmac_sha256_hex;
use lingo_billing_service::tap::{hash_string, parse_charge};
use lingo_billing_service::{create_router, AppState, ServiceConfig};
use lingo_billing_store::{RocksStore, Store};

/// Paddle webhook secret used by the harness.
pub const PADDLE_SECRET: &str = "pdl_ntfset_integration";

/// Tap secret key used by the harness.
pub const TAP_SECRET: &str = "sk_test_integration";

/// Admin API key used by the harness.
pub const ADMIN_KEY: &str = "test-admin-key";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Direct store access for assertions.
    pub store: Arc<dyn Store>,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
    /// User notified about promo code redemptions.
    pub admin_user_id: UserId,
}

impl TestHarness {
    /// Create a new test harness with a fresh database.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a harness, letting the caller adjust the configuration.
    pub fn with_config(adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store: Arc<dyn Store> =
            Arc::new(RocksStore::open(temp_dir.path()).expect("Failed to open store"));

        let admin_user_id = UserId::generate();

        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            allow_test_tokens: true,
            admin_api_key: Some(ADMIN_KEY.into()),
            admin_user_ids: vec![admin_user_id.clone()],
            paddle_webhook_secret: Some(PADDLE_SECRET.into()),
            tap_secret_key: Some(TAP_SECRET.into()),
            payment_test_mode: true,
            ..ServiceConfig::default()
        };
        adjust(&mut config);

        // Builds the EmailJS mailer when a test configures one
        let state = AppState::new(Arc::clone(&store), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");
        let test_user_id = UserId::generate();

        Self {
            server,
            store,
            _temp_dir: temp_dir,
            test_user_id,
            admin_user_id,
        }
    }

    /// Get the authorization header for user authentication.
    pub fn user_auth_header(&self) -> String {
        format!("Bearer test-token:{}", self.test_user_id)
    }

    /// Get a different user's auth header (for testing isolation).
    pub fn other_user_auth_header() -> String {
        let other_user = UserId::generate();
        format!("Bearer test-token:{}", other_user)
    }

    /// Auth header for a specific user.
    pub fn auth_header_for(user_id: &UserId) -> String {
        format!("Bearer test-token:{user_id}")
    }

    /// Sign a Paddle webhook body with the current time.
    pub fn paddle_signature(body: &str) -> String {
        let ts = Utc::now().timestamp();
        let sig = hmac_sha256_hex(PADDLE_SECRET, &format!("{ts}:{body}"));
        format!("ts={ts};h1={sig}")
    }

    /// Sign a Tap charge body.
    pub fn tap_signature(body: &str) -> String {
        let charge = parse_charge(body).expect("Invalid Tap charge");
        hmac_sha256_hex(TAP_SECRET, &hash_string(&charge))
    }

    /// Create a promo code through the admin API.
    pub async fn create_promo_code(&self, body: serde_json::Value) {
        self.server
            .post("/v1/admin/promo-codes")
            .add_header("x-admin-key", ADMIN_KEY)
            .json(&body)
            .await
            .assert_status_ok();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
