//! End-to-end tests for the key-value REST API.
//!
//! The router is driven in-process with `oneshot` over in-memory
//! collaborators from `tidekv-test-utils`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use proptest::prelude::*;
use serde_json::Value;
use tidekv_api::{create_api_router, AppState};
use tidekv_test_utils::fixtures::{fast_hydrator_config, fast_resolver_config};
use tidekv_test_utils::{CountingLogStore, FlakyCache};
use tokio::sync::watch;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    log: Arc<CountingLogStore>,
    cache: Arc<FlakyCache>,
}

fn app_with(hydrate: bool) -> TestApp {
    let log = Arc::new(CountingLogStore::new());
    let cache = Arc::new(FlakyCache::new());
    let hydrator = hydrate.then(fast_hydrator_config);
    let state = Arc::new(AppState::new(
        log.clone(),
        cache.clone(),
        fast_resolver_config(),
        hydrator,
    ));
    TestApp {
        router: create_api_router(Arc::clone(&state)),
        state,
        log,
        cache,
    }
}

fn app() -> TestApp {
    app_with(false)
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let request = builder
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

fn json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn put_returns_created_with_stored_record() {
    let app = app();
    let (status, body) = send(&app.router, Method::PUT, "/kv/user:1", Some(r#"{"value":"alice"}"#)).await;

    assert_eq!(status, StatusCode::CREATED);
    let record = json(&body);
    assert_eq!(record["key"], "user:1");
    assert_eq!(record["value"], "alice");
    assert_eq!(record["deleted"], false);
    assert!(record["timestamp"].is_string());
    assert_eq!(app.log.append_count(), 1);
}

#[tokio::test]
async fn get_after_put_reads_through_log_and_fills_cache() {
    let app = app();
    send(&app.router, Method::PUT, "/kv/user:1", Some(r#"{"value":"alice"}"#)).await;

    let (status, body) = send(&app.router, Method::GET, "/kv/user:1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body), serde_json::json!({"key": "user:1", "value": "alice"}));
    assert_eq!(app.cache.peek("user:1"), Some("alice".to_string()));

    // Second read is a cache hit.
    send(&app.router, Method::GET, "/kv/user:1", None).await;
    assert_eq!(app.log.query_count(), 1);
}

#[tokio::test]
async fn missing_key_is_404() {
    let app = app();
    let (status, body) = send(&app.router, Method::GET, "/kv/nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json(&body)["code"], "KEY_NOT_FOUND");
}

#[tokio::test]
async fn delete_returns_ok_and_hides_key() {
    let app = app();
    send(&app.router, Method::PUT, "/kv/k", Some(r#"{"value":"v"}"#)).await;

    let (status, body) = send(&app.router, Method::DELETE, "/kv/k", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());

    let (status, _) = send(&app.router, Method::GET, "/kv/k", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_of_unknown_key_still_appends_tombstone() {
    let app = app();
    let (status, _) = send(&app.router, Method::DELETE, "/kv/ghost", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.log.inner().history("ghost").await.len(), 1);
}

#[tokio::test]
async fn empty_key_is_rejected() {
    let app = app();
    for method in [Method::GET, Method::PUT, Method::DELETE] {
        for uri in ["/kv/", "/kv"] {
            let (status, body) = send(&app.router, method.clone(), uri, Some(r#"{"value":"v"}"#)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{} {}", method, uri);
            assert_eq!(json(&body)["code"], "MISSING_FIELD");
        }
    }
    assert_eq!(app.log.append_count(), 0);
}

#[tokio::test]
async fn malformed_put_body_is_rejected_without_side_effects() {
    let app = app();

    let (status, body) = send(&app.router, Method::PUT, "/kv/k", Some("not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["code"], "INVALID_INPUT");

    let (status, body) = send(&app.router, Method::PUT, "/kv/k", Some(r#"{"other":"v"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["code"], "MISSING_FIELD");

    let (status, _) = send(&app.router, Method::PUT, "/kv/k", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(app.log.append_count(), 0);
}

#[tokio::test]
async fn empty_value_is_accepted() {
    let app = app();
    let (status, _) = send(&app.router, Method::PUT, "/kv/blank", Some(r#"{"value":""}"#)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app.router, Method::GET, "/kv/blank", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["value"], "");
}

#[tokio::test]
async fn keys_may_contain_slashes() {
    let app = app();
    let (status, body) = send(&app.router, Method::PUT, "/kv/a/b/c", Some(r#"{"value":"deep"}"#)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json(&body)["key"], "a/b/c");

    let (status, body) = send(&app.router, Method::GET, "/kv/a/b/c", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["key"], "a/b/c");

    let (status, _) = send(&app.router, Method::GET, "/kv/a/b", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unsupported_method_is_405() {
    let app = app();
    let (status, _) = send(&app.router, Method::POST, "/kv/k", Some(r#"{"value":"v"}"#)).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn log_outage_surfaces_as_500() {
    let app = app();
    app.log.set_failing(true);

    let (status, body) = send(&app.router, Method::PUT, "/kv/k", Some(r#"{"value":"v"}"#)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json(&body)["code"], "LOG_UNAVAILABLE");

    let (status, _) = send(&app.router, Method::GET, "/kv/k", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, _) = send(&app.router, Method::DELETE, "/kv/k", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn slow_log_query_times_out_as_500() {
    let app = app();
    app.log.set_query_delay(Duration::from_secs(2));

    let (status, body) = send(&app.router, Method::GET, "/kv/k", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json(&body)["code"], "TIMEOUT");
}

#[tokio::test]
async fn cache_outage_does_not_affect_writes_or_reads() {
    let app = app();
    app.cache.set_unavailable(true);

    let (status, _) = send(&app.router, Method::PUT, "/kv/k", Some(r#"{"value":"v"}"#)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app.router, Method::GET, "/kv/k", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["value"], "v");
}

#[tokio::test]
async fn hydrator_converges_cache_after_delete() {
    let app = app_with(true);
    let hydrator = app.state.hydrator.clone().unwrap();
    let (stop, stopped) = watch::channel(false);
    let task = tokio::spawn(async move { hydrator.run(stopped).await });

    send(&app.router, Method::PUT, "/kv/k", Some(r#"{"value":"v1"}"#)).await;
    let (status, _) = send(&app.router, Method::GET, "/kv/k", None).await;
    assert_eq!(status, StatusCode::OK);

    send(&app.router, Method::DELETE, "/kv/k", None).await;

    let mut converged = false;
    for _ in 0..200 {
        if app.cache.peek("k").is_none() {
            converged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(converged, "hydrator never applied the tombstone");

    let (status, _) = send(&app.router, Method::GET, "/kv/k", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    stop.send(true).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn liveness_is_always_ok() {
    let app = app();
    app.log.set_failing(true);
    let (status, body) = send(&app.router, Method::GET, "/health/live", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["status"], "healthy");
}

#[tokio::test]
async fn readiness_follows_log_health() {
    let app = app();
    let (status, body) = send(&app.router, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["status"], "healthy");

    app.cache.set_unavailable(true);
    let (status, body) = send(&app.router, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["details"]["cache"]["status"], "degraded");

    app.log.set_failing(true);
    let (status, body) = send(&app.router, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json(&body)["details"]["log"]["status"], "unhealthy");
}

#[tokio::test]
async fn metrics_endpoint_exposes_request_and_cache_counters() {
    let app = app();
    send(&app.router, Method::GET, "/kv/absent", None).await;

    let (status, body) = send(&app.router, Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("tidekv_http_requests_total"));
    assert!(text.contains("/kv/*key"));
    assert!(text.contains("tidekv_cache_lookups"));
}

fn arb_path_key() -> impl Strategy<Value = String> {
    "[a-z0-9:_-]{1,12}(/[a-z0-9_-]{1,8}){0,2}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A PUT is readable at the same path, whether or not the key has slashes.
    #[test]
    fn put_then_get_returns_value(key in arb_path_key(), value in "[ -~]{0,24}") {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let app = app();
            let uri = format!("/kv/{}", key);
            let body = serde_json::json!({ "value": value }).to_string();

            let (status, _) = send(&app.router, Method::PUT, &uri, Some(&body)).await;
            prop_assert_eq!(status, StatusCode::CREATED);

            let (status, body) = send(&app.router, Method::GET, &uri, None).await;
            prop_assert_eq!(status, StatusCode::OK);
            let body = json(&body);
            prop_assert_eq!(body["key"].as_str(), Some(key.as_str()));
            prop_assert_eq!(body["value"].as_str(), Some(value.as_str()));
            Ok::<(), TestCaseError>(())
        })?;
    }
}
