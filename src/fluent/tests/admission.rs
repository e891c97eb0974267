//! Admission middleware through the full FluentRouter stack.

use super::{
    create_base_config, create_router_with_backend, create_test_router, get_body_json,
    get_request, post_as,
};
use crate::{
    Error, InMemoryBackend, OnBackendError, RateLimitBackend, RateLimitKey, RateLimitOutcome,
    Result,
};
use async_trait::async_trait;
use axum::http::{StatusCode, header::RETRY_AFTER};
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;
use tracing_test::traced_test;

const GENERATE: &str = "/api/generate-plan";

/// Backend whose store is unreachable.
struct FailingBackend;

#[async_trait]
impl RateLimitBackend for FailingBackend {
    async fn limit(&self, _key: &RateLimitKey) -> Result<RateLimitOutcome> {
        Err(Error::backend("connection refused"))
    }

    fn window(&self) -> Duration {
        Duration::from_secs(19)
    }
}

#[tokio::test(start_paused = true)]
async fn test_second_call_within_window_is_throttled() {
    let app = create_test_router(None);

    let response = app
        .clone()
        .oneshot(post_as(GENERATE, "x-user-id", "42"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-bouncer"], "hit");
    assert_eq!(response.headers()["x-ratelimit-limit"], "1");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    assert!(response.headers().contains_key("x-ratelimit-reset"));
    assert!(response.headers().contains_key("x-ratelimit-reset-at"));
    let body = get_body_json(response).await;
    assert_eq!(body["admission"]["key"], "user:42");

    tokio::time::advance(Duration::from_secs(5)).await;

    let response = app
        .oneshot(post_as(GENERATE, "x-user-id", "42"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-bouncer"], "limited");
    assert_eq!(response.headers()[RETRY_AFTER], "14");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    assert!(response.headers().contains_key("x-request-id"));
    let body = get_body_json(response).await;
    assert_eq!(
        body["error"],
        "Too many requests. Please wait 14s before generating another plan."
    );
}

#[tokio::test(start_paused = true)]
async fn test_key_recovers_after_window() {
    let app = create_test_router(None);

    let response = app
        .clone()
        .oneshot(post_as(GENERATE, "x-forwarded-for", "1.2.3.4"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::advance(Duration::from_secs(20)).await;

    let response = app
        .oneshot(post_as(GENERATE, "x-forwarded-for", "1.2.3.4"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(get_body_json(response).await["admission"]["key"], "ip:1.2.3.4");
}

#[tokio::test(start_paused = true)]
async fn test_keys_are_isolated() {
    let app = create_test_router(None);

    for user in ["42", "43"] {
        let response = app
            .clone()
            .oneshot(post_as(GENERATE, "x-user-id", user))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "user {user}");
    }

    let response = app
        .oneshot(post_as(GENERATE, "x-user-id", "42"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_user_header_takes_precedence_over_address() {
    let app = create_test_router(None);

    let response = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri(GENERATE)
                .header("x-user-id", "alice")
                .header("x-forwarded-for", "1.2.3.4")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(get_body_json(response).await["admission"]["key"], "user:alice");

    // Same address, different user: not throttled by alice's admission.
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri(GENERATE)
                .header("x-user-id", "bob")
                .header("x-forwarded-for", "1.2.3.4")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unprotected_routes_bypass_admission() {
    let app = create_test_router(None);

    for _ in 0..3 {
        let response = app.clone().oneshot(get_request("/api/plans")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-bouncer"));
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }
}

#[tokio::test]
async fn test_probe_route_is_protected() {
    let app = create_test_router(None);

    let response = app.clone().oneshot(get_request("/api/rl-probe")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.oneshot(get_request("/api/rl-probe")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_wildcard_protected_routes() {
    let mut config = create_base_config();
    config.admission.protected_routes = vec!["/api/**".into()];
    let app = create_test_router(Some(config));

    let response = app.clone().oneshot(get_request("/api/plans")).await.unwrap();
    assert_eq!(response.headers()["x-bouncer"], "hit");
    // Shares the key (and quota) with the first call.
    let response = app.oneshot(get_request("/api/rl-probe")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test(start_paused = true)]
async fn test_configured_quota() {
    let config = create_base_config().with_rate_limit_max_requests(3);
    let app = create_test_router(Some(config));

    for remaining in ["2", "1", "0"] {
        let response = app
            .clone()
            .oneshot(post_as(GENERATE, "x-user-id", "7"))
            .await
            .unwrap();
        assert_eq!(response.headers()["x-ratelimit-remaining"], remaining);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
    }

    let response = app
        .oneshot(post_as(GENERATE, "x-user-id", "7"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_backend_failure_admits_and_tags_degraded() {
    let app = create_router_with_backend(create_base_config(), Arc::new(FailingBackend));

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post_as(GENERATE, "x-user-id", "42"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-bouncer"], "degraded");
        assert!(!response.headers().contains_key("x-ratelimit-remaining"));
        let body = get_body_json(response).await;
        assert_eq!(body["plan"], "ok");
        assert!(body["admission"].is_null());
    }
}

#[tokio::test]
async fn test_backend_failure_with_deny_policy() {
    let config = create_base_config().with_on_backend_error(OnBackendError::Deny);
    let app = create_router_with_backend(config, Arc::new(FailingBackend));

    let response = app
        .oneshot(post_as(GENERATE, "x-user-id", "42"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()["x-bouncer"], "degraded");
    assert_eq!(response.headers()[RETRY_AFTER], "19");
    assert!(get_body_json(response).await["error"].is_string());
}

#[tokio::test]
async fn test_injected_backend_is_shared() {
    let backend = Arc::new(InMemoryBackend::new(Duration::from_secs(19), 1));
    let app = create_router_with_backend(create_base_config(), backend.clone());

    let response = app
        .oneshot(post_as(GENERATE, "x-user-id", "42"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let outcome = backend
        .limit(&RateLimitKey::User("42".into()))
        .await
        .unwrap();
    assert!(!outcome.allowed);
}

#[tokio::test]
async fn test_excluded_admission_never_throttles() {
    let config = create_base_config().with_excluded_middlewares(vec![crate::HttpMiddleware::Admission]);
    let app = create_test_router(Some(config));

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(post_as(GENERATE, "x-user-id", "42"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-bouncer"));
    }
}

#[tokio::test]
#[traced_test]
async fn test_throttling_is_logged_with_key() {
    let app = create_test_router(None);

    for _ in 0..2 {
        app.clone()
            .oneshot(post_as(GENERATE, "x-user-id", "42"))
            .await
            .unwrap();
    }

    assert!(logs_contain("Request throttled"));
    assert!(logs_contain("user:42"));
}
