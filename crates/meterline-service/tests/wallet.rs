//! Wallet and onboarding integration tests.

mod common;

use common::{TestHarness, WithHeader};

use meterline_core::UserId;

// ============================================================================
// Wallet
// ============================================================================

#[tokio::test]
async fn wallet_is_created_on_first_read() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/wallet")
        .header_pair(harness.user_auth())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["user_id"], harness.test_user_id.to_string());
    assert_eq!(body["balance"], 0);
    assert!(body["package_id"].is_null());
    assert!(body["expires_at"].is_null());
    assert!(harness.wallet(&harness.test_user_id).is_some());
}

#[tokio::test]
async fn wallet_requires_a_valid_token() {
    let harness = TestHarness::new();

    harness.server.get("/v1/wallet").await.assert_status_unauthorized();

    harness
        .server
        .get("/v1/wallet")
        .header_pair((
            axum::http::header::AUTHORIZATION,
            axum::http::HeaderValue::from_static("Bearer not-a-jwt"),
        ))
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn users_only_see_their_own_wallet() {
    let harness = TestHarness::new();
    let other = UserId::generate();
    harness.fund(&other, 500);

    let body: serde_json::Value = harness
        .server
        .get("/v1/wallet")
        .header_pair(harness.user_auth())
        .await
        .json();
    assert_eq!(body["balance"], 0);

    let body: serde_json::Value = harness
        .server
        .get("/v1/wallet")
        .header_pair(TestHarness::auth_for(&other))
        .await
        .json();
    assert_eq!(body["balance"], 500);
}

// ============================================================================
// Initial grant
// ============================================================================

#[tokio::test]
async fn initial_grant_applies_once() {
    let harness = TestHarness::new();
    let package_plan = harness.seed_package_plan(250, 0, true);

    let first: serde_json::Value = harness
        .server
        .post("/v1/wallet/initial-grant")
        .header_pair(harness.user_auth())
        .await
        .json();
    assert_eq!(first["status"], "granted");
    assert_eq!(first["credits_granted"], 250);
    assert_eq!(first["balance"], 250);

    let second: serde_json::Value = harness
        .server
        .post("/v1/wallet/initial-grant")
        .header_pair(harness.user_auth())
        .await
        .json();
    assert_eq!(second["status"], "already_granted");
    assert_eq!(second["credits_granted"], 0);
    assert_eq!(second["balance"], 250);

    let wallet = harness.wallet(&harness.test_user_id).unwrap();
    assert_eq!(wallet.package, Some(package_plan.package));
    assert_eq!(wallet.plan, Some(package_plan.plan));
    assert!(wallet.expires_at.is_some());
    assert_eq!(harness.ledger(&harness.test_user_id).len(), 1);
}

#[tokio::test]
async fn initial_grant_without_initial_package() {
    let harness = TestHarness::new();
    harness.seed_package_plan(250, 999, false);

    let response = harness
        .server
        .post("/v1/wallet/initial-grant")
        .header_pair(harness.user_auth())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "no_initial_package");
    assert_eq!(body["balance"], 0);
}

// ============================================================================
// Ledger
// ============================================================================

#[tokio::test]
async fn ledger_lists_newest_first_and_pages() {
    let harness = TestHarness::new();
    harness.seed_package_plan(100, 0, true);
    let endpoint = harness.seed_endpoint(0);

    harness
        .server
        .post("/v1/wallet/initial-grant")
        .header_pair(harness.user_auth())
        .await
        .assert_status_ok();
    for _ in 0..3 {
        harness
            .server
            .post("/v1/meter/end")
            .header_pair(TestHarness::service_auth())
            .json(&serde_json::json!({
                "user_id": harness.test_user_id.to_string(),
                "feature_endpoint_id": endpoint.id.to_string(),
                "usages": [{ "type": "tokens", "input_tokens": 1, "output_tokens": 4 }],
            }))
            .await
            .assert_status_ok();
    }

    let body: serde_json::Value = harness
        .server
        .get("/v1/wallet/ledger")
        .header_pair(harness.user_auth())
        .await
        .json();
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0]["entry_type"], "decrease");
    assert_eq!(entries[0]["balance_after"], 97);
    assert_eq!(entries[3]["entry_type"], "increase");
    assert_eq!(entries[3]["amount"], 100);

    let body: serde_json::Value = harness
        .server
        .get("/v1/wallet/ledger")
        .add_query_param("limit", 2)
        .add_query_param("offset", 2)
        .header_pair(harness.user_auth())
        .await
        .json();
    let page = body["entries"].as_array().unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[1]["entry_type"], "increase");
}
