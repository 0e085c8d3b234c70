//! App install callback: token exchange and webhook registration.

#![allow(clippy::unwrap_used)]

use delivery_dates_integration_tests::{
    ACCESS_TOKEN, API_SECRET, OAUTH_CODE, SHOP, TestApp, encode_query, signed_callback_query,
};
use reqwest::StatusCode;
use serde_json::Value;

fn callback_params(code: &str) -> Vec<(String, String)> {
    signed_callback_query(
        &[
            ("code", code),
            ("shop", SHOP),
            ("state", "nonce-123"),
            ("timestamp", "1767225600"),
        ],
        API_SECRET,
    )
}

async fn install(app: &TestApp, params: &[(String, String)]) -> reqwest::Response {
    app.client
        .get(app.url(&format!("/auth/callback?{}", encode_query(params))))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_install_stores_token_and_registers_webhooks() {
    let app = TestApp::spawn().await;

    let response = install(&app, &callback_params(OAUTH_CODE)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["shop"], SHOP);
    assert_eq!(body["scopes"][0], "write_orders");

    let webhooks = body["webhooks"].as_array().unwrap();
    assert_eq!(webhooks.len(), 3);
    for webhook in webhooks {
        assert_eq!(webhook["status"], "registered");
        assert_eq!(webhook["result"], "created");
    }

    let subscriptions = app.mock.subscriptions();
    assert!(subscriptions.contains(&(
        "ORDERS_CREATE".to_string(),
        format!("{}/api/webhooks/orders/create", app.base_url)
    )));
    assert!(subscriptions.iter().any(|(topic, _)| topic == "APP_UNINSTALLED"));

    let token = app
        .state
        .tokens()
        .get(&TestApp::shop())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(token.access_token, ACCESS_TOKEN);
}

#[tokio::test]
async fn test_reinstall_reports_existing_webhooks() {
    let app = TestApp::spawn().await;
    install(&app, &callback_params(OAUTH_CODE)).await;

    let body: Value = install(&app, &callback_params(OAUTH_CODE))
        .await
        .json()
        .await
        .unwrap();
    for webhook in body["webhooks"].as_array().unwrap() {
        assert_eq!(webhook["status"], "registered");
        assert_eq!(webhook["result"], "already_registered");
    }
    assert_eq!(app.mock.subscriptions().len(), 3);
}

#[tokio::test]
async fn test_tampered_callback_is_rejected() {
    let app = TestApp::spawn().await;

    let mut params = callback_params(OAUTH_CODE);
    for (key, value) in &mut params {
        if key == "shop" {
            *value = "other-shop.myshopify.com".to_string();
        }
    }

    let response = install(&app, &params).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.mock.subscriptions().is_empty());
}

#[tokio::test]
async fn test_rejected_code_is_bad_gateway() {
    let app = TestApp::spawn().await;

    let response = install(&app, &callback_params("stale-code")).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(
        app.state
            .tokens()
            .get(&TestApp::shop())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_denied_consent_is_bad_request() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/auth/callback?error=access_denied"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
