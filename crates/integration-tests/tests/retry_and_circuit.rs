//! Retry queue, dead-lettering and the per-shop circuit breaker.

#![allow(clippy::unwrap_used)]

use delivery_dates_integration_tests::{SHOP, TestApp, order_payload, test_pipeline_config};
use delivery_dates_server::config::PipelineConfig;
use serde_json::Value;

async fn send_order(app: &TestApp, order_id: i64) -> Value {
    let payload = order_payload(order_id, &[("delivery_date", "2026-04-01")]);
    app.send_webhook("orders/create", None, &payload)
        .await
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_server_error_is_retried_by_sweep() {
    let app = TestApp::spawn().await;
    app.install_token().await;
    app.mock.add_order(2001);
    app.mock.fail_with(Some(500));

    let body = send_order(&app, 2001).await;
    assert_eq!(body["outcome"], "retry_scheduled");
    assert_eq!(body["category"], "shopify_server");
    assert_eq!(body["attempts"], 1);
    assert_eq!(app.mock.operation_count("OrderMetafields"), 3);

    let retries = app.state.pipeline().pending_retries(10).await.unwrap();
    assert_eq!(retries.len(), 1);

    app.mock.fail_with(None);
    let sweep: Value = app.admin_post("/retries/run").await.json().await.unwrap();
    assert_eq!(sweep["processed"], 1);
    assert_eq!(sweep["succeeded"], 1);

    assert_eq!(
        app.mock.metafield(2001, "delivery_date").unwrap().1,
        "2026-04-01"
    );
    let status: Value = app
        .admin_get(&format!("/orders/{SHOP}/2001"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "completed");
    assert_eq!(status["attempts"], 2);
    assert!(app.state.pipeline().pending_retries(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_exhausted_retries_are_dead_lettered() {
    let app = TestApp::spawn_with(PipelineConfig {
        max_attempts: 2,
        ..test_pipeline_config()
    })
    .await;
    app.install_token().await;
    app.mock.add_order(2002);
    app.mock.fail_with(Some(503));

    let body = send_order(&app, 2002).await;
    assert_eq!(body["outcome"], "retry_scheduled");

    let sweep: Value = app.admin_post("/retries/run").await.json().await.unwrap();
    assert_eq!(sweep["processed"], 1);
    assert_eq!(sweep["dead_lettered"], 1);

    let dead_letters: Vec<Value> = app.admin_get("/dead-letters").await.json().await.unwrap();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0]["category"], "shopify_server");
    assert_eq!(dead_letters[0]["attempts"], 2);

    let stats: Value = app.admin_get("/stats").await.json().await.unwrap();
    assert_eq!(stats["failed"], 1);
    assert_eq!(stats["dead_letters"], 1);
    assert_eq!(stats["retry_queue"], 0);
}

#[tokio::test]
async fn test_circuit_opens_and_defers_orders_until_reset() {
    let app = TestApp::spawn_with(PipelineConfig {
        circuit_failure_threshold: 2,
        ..test_pipeline_config()
    })
    .await;
    app.install_token().await;
    for id in [3001, 3002, 3003] {
        app.mock.add_order(id);
    }
    app.mock.fail_with(Some(500));

    assert_eq!(send_order(&app, 3001).await["category"], "shopify_server");
    assert_eq!(send_order(&app, 3002).await["category"], "shopify_server");

    let circuit: Value = app
        .admin_get(&format!("/circuit/{SHOP}"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(circuit["state"], "open");

    let calls_before = app.mock.operation_count("OrderMetafields");
    let deferred = send_order(&app, 3003).await;
    assert_eq!(deferred["outcome"], "retry_scheduled");
    assert_eq!(deferred["category"], "circuit_open");
    assert_eq!(deferred["attempts"], 0);
    assert_eq!(app.mock.operation_count("OrderMetafields"), calls_before);

    let errors: Vec<Value> = app.admin_get("/errors").await.json().await.unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e["category"] == "shopify_server"));

    let reset: Value = app
        .admin_post(&format!("/circuit/{SHOP}/reset"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(reset["state"], "closed");
    assert_eq!(reset["failure_count"], 0);

    // 3003 waits out the open period; the other two are due now
    app.mock.fail_with(None);
    let sweep: Value = app.admin_post("/retries/run").await.json().await.unwrap();
    assert_eq!(sweep["processed"], 2);
    assert_eq!(sweep["succeeded"], 2);

    let deferred_status: Value = app
        .admin_get(&format!("/orders/{SHOP}/3003"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(deferred_status["status"], "retrying");
    assert_eq!(deferred_status["error_category"], "circuit_open");
}

#[tokio::test]
async fn test_unauthorized_shopify_token_is_not_retried() {
    let app = TestApp::spawn().await;
    app.state
        .tokens()
        .save(&TestApp::shop(), "revoked-token", vec![])
        .await
        .unwrap();
    app.mock.add_order(2003);

    let body = send_order(&app, 2003).await;
    assert_eq!(body["outcome"], "dead_lettered");
    assert_eq!(body["category"], "authentication");
    assert!(app.state.pipeline().pending_retries(10).await.unwrap().is_empty());
}
