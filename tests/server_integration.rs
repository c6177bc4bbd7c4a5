//! HTTP Server Integration Tests
//!
//! Most tests exercise the router with a pool pointed at a port that never
//! accepts connections. Everything that must be rejected before reaching the
//! store returns 400; everything that reaches the store surfaces as 500 or 503.
//!
//! The success paths need a running Redis and are ignored by default:
//!
//! ```text
//! TRACKLIST_TEST_REDIS_URL=redis://127.0.0.1:6379/15 cargo test -- --ignored
//! ```
//!
//! # Test Coverage
//!
//! 1. **Track Endpoint** - POST /track validation, store failure and success
//! 2. **Retention Endpoint** - GET /retention validation, store failure and report
//! 3. **Health Endpoint** - GET /health with the store down and up
//! 4. **CORS** - Any-origin and allow-list layers

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use tracklist::{
    http::{router, AppState},
    Keyspace, RedisConfig, RedisPool, Tracker,
};

// =============================================================================
// Helpers
// =============================================================================

fn create_test_router(cors_origins: &[String]) -> Router {
    let config = RedisConfig::with_url("redis://127.0.0.1:1/0")
        .connection_timeout(Duration::from_millis(200));
    let pool = Arc::new(RedisPool::new(config).unwrap());
    let tracker = Tracker::new(pool, Keyspace::new("httptest").unwrap());
    router(Arc::new(AppState::new(tracker)), cors_origins)
}

static NAMESPACE_SEQ: AtomicU32 = AtomicU32::new(0);

/// Router and tracker on the test Redis, under a namespace of their own
fn create_live_router(label: &str) -> (Router, Tracker) {
    let url = std::env::var("TRACKLIST_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());
    let namespace = format!(
        "h{}{}{}",
        label,
        std::process::id(),
        NAMESPACE_SEQ.fetch_add(1, Ordering::Relaxed)
    );
    let pool = Arc::new(RedisPool::new(RedisConfig::with_url(url)).unwrap());
    let tracker = Tracker::new(pool, Keyspace::new(namespace).unwrap());
    let router = router(Arc::new(AppState::new(tracker.clone())), &[]);
    (router, tracker)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(json!({}));

    (status, json)
}

async fn post_form(router: &Router, uri: &str, form: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap();
    send(router, request).await
}

async fn get_request(router: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(router, request).await
}

fn error_message(body: &Value) -> &str {
    body["error"].as_str().unwrap_or_default()
}

// =============================================================================
// Tests: Track Endpoint
// =============================================================================

#[tokio::test]
async fn test_track_rejects_malformed_id() {
    let router = create_test_router(&[]);

    for form in [
        "name=active&id=abc",
        "name=active&id=-5",
        "name=active&id=1.5",
        "name=active&id=4294967296",
        "name=active&id=",
        "name=active",
    ] {
        let (status, body) = post_form(&router, "/track", form).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", form);
        assert!(error_message(&body).contains("id"), "{}: {}", form, body);
    }
}

#[tokio::test]
async fn test_track_rejects_invalid_name() {
    let router = create_test_router(&[]);

    let (status, body) = post_form(&router, "/track", "id=1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("name"));

    for form in ["name=page-views&id=1", "name=a%20b&id=1", "name=list*&id=1"] {
        let (status, _) = post_form(&router, "/track", form).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", form);
    }
}

#[tokio::test]
async fn test_track_requires_form_body() {
    let router = create_test_router(&[]);

    let request = Request::builder()
        .method("POST")
        .uri("/track")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"name":"active","id":1}"#))
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!error_message(&body).is_empty());
}

#[tokio::test]
async fn test_track_store_down_is_server_error() {
    let router = create_test_router(&[]);

    let (status, body) = post_form(&router, "/track", "name=active&id=123").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(error_message(&body).contains("Connection error"));
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_track_records_presence() {
    let (router, tracker) = create_live_router("track");

    let (status, body) = post_form(&router, "/track", "name=active&id=123").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({"name": "active", "id": 123}));

    let month = tracker.month_bitmap_at("active", Utc::now()).unwrap();
    assert!(month.test(123).await.unwrap());
    assert!(!month.test(124).await.unwrap());

    tracker.delete_all_buckets().await.unwrap();
}

#[tokio::test]
async fn test_track_wrong_method() {
    let router = create_test_router(&[]);
    let (status, _) = get_request(&router, "/track").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

// =============================================================================
// Tests: Retention Endpoint
// =============================================================================

#[tokio::test]
async fn test_retention_validation() {
    let router = create_test_router(&[]);

    let cases = [
        "/retention?unit=day&interval=3&from_date=2024-01-01",
        "/retention?name=active&unit=fortnight&interval=3&from_date=2024-01-01&to_date=2024-01-05",
        "/retention?name=active&unit=day&interval=x&from_date=2024-01-01&to_date=2024-01-05",
        "/retention?name=active&unit=day&interval=-1&from_date=2024-01-01&to_date=2024-01-05",
        "/retention?name=active&unit=day&interval=3&from_date=2024/01/01&to_date=2024-01-05",
        "/retention?name=active&unit=day&interval=3&from_date=2024-01-01&to_date=2024-13-05",
        "/retention?name=active&unit=day&interval=3&from_date=2024-01-01",
        // reversed range
        "/retention?name=active&unit=day&interval=3&from_date=2024-01-05&to_date=2024-01-01",
        // too many cohorts
        "/retention?name=active&unit=hour&interval=1&from_date=2020-01-01&to_date=2024-01-01",
        "/retention?name=page-views&unit=day&interval=3&from_date=2024-01-01&to_date=2024-01-05",
    ];

    for uri in cases {
        let (status, body) = get_request(&router, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert!(!error_message(&body).is_empty(), "{}", uri);
    }
}

#[tokio::test]
async fn test_retention_store_down_is_server_error() {
    let router = create_test_router(&[]);

    let (status, body) = get_request(
        &router,
        "/retention?name=active&unit=month&interval=2&from_date=2024-01-01&to_date=2024-03-31",
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!error_message(&body).is_empty());
}

#[tokio::test]
async fn test_retention_without_name_reaches_store() {
    let router = create_test_router(&[]);

    let (status, body) = get_request(
        &router,
        "/retention?unit=day&interval=12&from_date=2013-06-01&to_date=2013-06-12",
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(error_message(&body).contains("Connection error"), "{}", body);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_retention_report_without_name() {
    let (router, tracker) = create_live_router("retention");

    for day in 1..=24 {
        let t = Utc.with_ymd_and_hms(2013, 6, day, 12, 0, 0).unwrap();
        for id in [1, 2, 3] {
            tracker.record_at_time("active", id, t).await.unwrap();
        }
    }

    let (status, body) = get_request(
        &router,
        "/retention?unit=day&interval=12&from_date=2013-06-01&to_date=2013-06-12",
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["name"], "active");
    assert_eq!(body["unit"], "day");
    assert_eq!(body["interval"], 12);

    let cohorts = body["cohorts"].as_array().unwrap();
    assert_eq!(cohorts.len(), 12);
    for cohort in cohorts {
        assert_eq!(cohort["size"], 3);
        assert_eq!(cohort["retained"], json!(vec![3; 12]));
    }

    // an explicit name overrides the default
    let (status, body) = get_request(
        &router,
        "/retention?name=signup&unit=day&interval=1&from_date=2013-06-01&to_date=2013-06-01",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "signup");
    assert_eq!(body["cohorts"][0]["size"], 0);

    tracker.delete_all_buckets().await.unwrap();
}

// =============================================================================
// Tests: Health Endpoint
// =============================================================================

#[tokio::test]
async fn test_health_reports_unreachable_store() {
    let router = create_test_router(&[]);

    let (status, body) = get_request(&router, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert!(body["error"].is_string());
    assert!(body["pool"]["connection_failures"].as_u64().unwrap() >= 1);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_health_reports_reachable_store() {
    let (router, _tracker) = create_live_router("health");

    let (status, body) = get_request(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["latency_us"].is_u64());
    assert_eq!(body["pool"]["connections_created"], 1);
}

#[tokio::test]
async fn test_unknown_route() {
    let router = create_test_router(&[]);
    let (status, _) = get_request(&router, "/api/v1/nothing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Tests: CORS
// =============================================================================

#[tokio::test]
async fn test_cors_any_origin() {
    let router = create_test_router(&[]);

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/track")
        .header(header::ORIGIN, "https://dashboard.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

#[tokio::test]
async fn test_cors_allow_list() {
    let router = create_test_router(&["https://dashboard.example.com".to_string()]);

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/track")
        .header(header::ORIGIN, "https://dashboard.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://dashboard.example.com"
    );

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/track")
        .header(header::ORIGIN, "https://elsewhere.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert!(response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}
