//! Storefront delivery date lookup, health checks and admin auth.

#![allow(clippy::unwrap_used)]

use chrono::{Days, Utc};
use delivery_dates_integration_tests::{FAILING_POSTAL_CODE, TestApp};
use reqwest::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn test_delivery_dates_drop_past_dates() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/api/delivery-dates?postalCode=1234%20ab"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["postal_code"], "1234AB");
    assert_eq!(body["country"], "NL");

    let dates = body["delivery_dates"].as_array().unwrap();
    let tomorrow = Utc::now().date_naive().checked_add_days(Days::new(1)).unwrap();
    assert_eq!(dates.len(), 2);
    assert_eq!(dates[0]["date"], tomorrow.format("%Y-%m-%d").to_string());
    assert_eq!(dates[0]["display_date"], tomorrow.format("%d-%m-%Y").to_string());
    assert_eq!(dates[0]["shipping_methods"][0]["code"], "EVE");
    assert_eq!(dates[0]["shipping_methods"].as_array().unwrap().len(), 2);

    let queries = app.mock.dutchned_queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0]["postal_code"], "1234AB");
    assert_eq!(queries[0]["days"], "14");
}

#[tokio::test]
async fn test_delivery_dates_are_cached_per_query() {
    let app = TestApp::spawn().await;

    for _ in 0..3 {
        let response = app
            .client
            .get(app.url("/api/delivery-dates?postal_code=1234AB"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    app.client
        .get(app.url("/api/delivery-dates?postal_code=1234AB&days=7"))
        .send()
        .await
        .unwrap();

    assert_eq!(app.mock.dutchned_queries().len(), 2);
}

#[tokio::test]
async fn test_invalid_postal_code_is_bad_request() {
    let app = TestApp::spawn().await;

    for query in ["", "?postal_code=12", "?postal_code=1234AB&days=0"] {
        let response = app
            .client
            .get(app.url(&format!("/api/delivery-dates{query}")))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "query {query:?}");
    }
    assert!(app.mock.dutchned_queries().is_empty());
}

#[tokio::test]
async fn test_upstream_failure_is_bad_gateway() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url(&format!(
            "/api/delivery-dates?postal_code={FAILING_POSTAL_CODE}"
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_storefront_lookups_are_rate_limited_per_client() {
    let app = TestApp::spawn().await;

    let mut limited = 0;
    for _ in 0..30 {
        let response = app
            .client
            .get(app.url("/api/delivery-dates?postal_code=1234AB"))
            .header("x-forwarded-for", "203.0.113.7")
            .send()
            .await
            .unwrap();
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            limited += 1;
        }
    }
    assert!(limited > 0);

    let other_client = app
        .client
        .get(app.url("/api/delivery-dates?postal_code=1234AB"))
        .header("x-forwarded-for", "198.51.100.2")
        .send()
        .await
        .unwrap();
    assert_eq!(other_client.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::spawn().await;

    let live = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);
    assert_eq!(live.text().await.unwrap(), "ok");

    let ready = app.client.get(app.url("/health/ready")).send().await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_requires_bearer_token() {
    let app = TestApp::spawn().await;

    let anonymous = app.client.get(app.url("/admin/stats")).send().await.unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .client
        .get(app.url("/admin/stats"))
        .bearer_auth("not-the-admin-token")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let ok = app.admin_get("/stats").await;
    assert_eq!(ok.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/health"))
        .header("x-request-id", "req-abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "req-abc-123"
    );
}
