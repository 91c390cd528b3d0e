//! Subscription and test-mode activation integration tests.

mod common;

use axum::http::StatusCode;
use common::{TestHarness, ADMIN_KEY};
use serde_json::{json, Value};

#[tokio::test]
async fn new_user_has_no_subscription() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/subscription")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["has_access"], false);
    assert!(body["subscription"].is_null());
    assert!(body["applied_promo"].is_null());
}

#[tokio::test]
async fn subscription_requires_auth() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/subscription")
        .await
        .assert_status_unauthorized();

    harness
        .server
        .get("/v1/subscription")
        .add_header("authorization", "Bearer not-a-jwt")
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_tokens_are_refused_unless_enabled() {
    let harness = TestHarness::with_config(|config| config.allow_test_tokens = false);

    harness
        .server
        .get("/v1/subscription")
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_activate_with_promo_code() {
    let harness = TestHarness::new();
    harness
        .create_promo_code(json!({"code": "SAVE20", "discount_percentage": 20}))
        .await;

    let response = harness
        .server
        .post("/v1/subscription/test-activate")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({"plan": "premium", "promo_code": "save20"}))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["outcome"], "applied");
    assert_eq!(body["amount_cents"], 3920);
    assert_eq!(body["has_access"], true);
    assert_eq!(body["subscription"]["plan"], "premium");
    assert_eq!(body["subscription"]["status"], "active");
    assert_eq!(body["subscription"]["discount_percentage"], 20);
    assert_eq!(body["subscription"]["applied_promo_code"], "SAVE20");
    assert_eq!(body["applied_promo"]["code"], "SAVE20");

    let response = harness
        .server
        .get("/v1/payments")
        .add_header("authorization", harness.user_auth_header())
        .await;
    let body: Value = response.json();
    assert_eq!(body["payments"][0]["provider"], "manual");
    assert_eq!(body["payments"][0]["amount_cents"], 3920);

    // The code is now used up for this student
    let response = harness
        .server
        .post("/v1/subscription/test-activate")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({"plan": "premium", "promo_code": "SAVE20"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_activate_without_promo_charges_list_price() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/subscription/test-activate")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({"plan": "enterprise"}))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["amount_cents"], 9900);
    assert_eq!(body["subscription"]["plan"], "enterprise");
    assert!(body["subscription"]["applied_promo_code"].is_null());
}

#[tokio::test]
async fn test_activate_forbidden_outside_test_mode() {
    let harness = TestHarness::with_config(|config| config.payment_test_mode = false);

    let response = harness
        .server
        .post("/v1/subscription/test-activate")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({"plan": "basic"}))
        .await;

    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn payments_paginate() {
    let harness = TestHarness::new();

    for plan in ["basic", "premium", "enterprise"] {
        harness
            .server
            .post("/v1/subscription/test-activate")
            .add_header("authorization", harness.user_auth_header())
            .json(&json!({"plan": plan}))
            .await
            .assert_status_ok();
        // Distinct millisecond event ids
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let response = harness
        .server
        .get("/v1/payments?limit=2")
        .add_header("authorization", harness.user_auth_header())
        .await;
    let body: Value = response.json();
    assert_eq!(body["payments"].as_array().unwrap().len(), 2);
    assert_eq!(body["has_more"], true);

    let response = harness
        .server
        .get("/v1/payments?limit=2&offset=2")
        .add_header("authorization", harness.user_auth_header())
        .await;
    let body: Value = response.json();
    assert_eq!(body["payments"].as_array().unwrap().len(), 1);
    assert_eq!(body["has_more"], false);

    // Other students see nothing
    let response = harness
        .server
        .get("/v1/payments")
        .add_header("authorization", TestHarness::other_user_auth_header())
        .await;
    let body: Value = response.json();
    assert!(body["payments"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn expiry_sweep_is_admin_only() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/admin/subscriptions/expire")
        .await
        .assert_status_unauthorized();

    harness
        .server
        .post("/v1/subscription/test-activate")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({"plan": "basic"}))
        .await
        .assert_status_ok();

    // A fresh month is neither lapsed nor close to ending
    let response = harness
        .server
        .post("/v1/admin/subscriptions/expire")
        .add_header("x-admin-key", ADMIN_KEY)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["expired"], 0);
    assert_eq!(body["reminded"], 0);
}
