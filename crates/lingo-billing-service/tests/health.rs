//! Health and catalogue endpoint integration tests.

mod common;

use common::TestHarness;

#[tokio::test]
async fn health_check_returns_ok() {
    let harness = TestHarness::new();

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "lingo-billing");
    assert_eq!(body["test_mode"], true);
    assert_eq!(body["payment_providers"], serde_json::json!(["paddle", "tap"]));
    assert_eq!(body["email_enabled"], false);
}

#[tokio::test]
async fn health_lists_only_configured_providers() {
    let harness = TestHarness::with_config(|config| {
        config.tap_secret_key = None;
        config.payment_test_mode = false;
    });

    let body: serde_json::Value = harness.server.get("/health").await.json();

    assert_eq!(body["payment_providers"], serde_json::json!(["paddle"]));
    assert_eq!(body["test_mode"], false);
}

#[tokio::test]
async fn plans_are_public() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/plans").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let plans = body["plans"].as_array().unwrap();
    assert_eq!(plans.len(), 3);
    assert_eq!(plans[0]["plan"], "basic");
    assert_eq!(plans[0]["monthly_price_cents"], 2900);
    assert_eq!(plans[1]["monthly_price_cents"], 4900);
    assert_eq!(plans[2]["monthly_price_cents"], 9900);
}
