//! Test helpers for FluentRouter tests.
//!
//! These tests use `oneshot()` for fast, in-process testing without network
//! I/O. Because `oneshot()` provides no `ConnectInfo<SocketAddr>`, callers are
//! identified through headers here; the connection-address path is covered by
//! the integration tests under `tests/`.

use crate::{Admission, Config, FluentRouter, InMemoryLedger, RateLimitBackend};
use axum::{
    Json, Router,
    body::Body,
    http::Request,
    response::Response,
    routing::{get, post},
};
use std::sync::Arc;

#[cfg(test)]
pub(crate) mod admission;
#[cfg(test)]
pub(crate) mod payments;

// ============================================================================
// Configuration Helpers
// ============================================================================

const BASE_CONFIG_TOML: &str = r#"
[http]
bind_addr = "127.0.0.1"
bind_port = 3000
liveness_route = "/live"
readiness_route = "/ready"

[admission]
protected_routes = ["/api/generate-plan", "/api/rl-probe"]

[admission.rate_limit]
window = "19s"
max_requests = 1

[admission.idempotency]
ttl = "2m"

[logging]
format = "json"
"#;

/// Creates a base test configuration by parsing TOML.
pub(crate) fn create_base_config() -> Config {
    BASE_CONFIG_TOML
        .parse()
        .expect("Failed to parse test config TOML")
}

/// Creates a configuration with additional TOML appended to the base one.
/// Later tables must not repeat a table already present in the base.
pub(crate) fn create_config_with_toml(additional_toml: &str) -> Config {
    format!("{BASE_CONFIG_TOML}\n{additional_toml}")
        .parse()
        .expect("Failed to parse test config TOML")
}

// ============================================================================
// Router Helpers
// ============================================================================

/// Routes shared by all router tests: the protected generation endpoint, a
/// probe endpoint and an unprotected one.
fn app_routes() -> Router {
    Router::new()
        .route(
            "/api/generate-plan",
            post(|request: Request<Body>| async move {
                let admission = request.extensions().get::<Admission>().cloned();
                Json(serde_json::json!({ "plan": "ok", "admission": admission }))
            }),
        )
        .route("/api/rl-probe", get(|| async { "probe\n" }))
        .route("/api/plans", get(|| async { "plans\n" }))
        .route(
            "/panic",
            get(|| async {
                panic!("boom");
                #[allow(unreachable_code)]
                "unreachable"
            }),
        )
}

/// Creates a test router from `config` (or the base config).
pub(crate) fn create_test_router(config: Option<Config>) -> Router {
    FluentRouter::without_state(config.unwrap_or_else(create_base_config))
        .expect("Failed to create FluentRouter")
        .merge(app_routes())
        .setup_middleware()
        .expect("Failed to setup middleware")
        .into_inner()
}

/// Creates a test router whose rate-limit backend is `backend`.
pub(crate) fn create_router_with_backend(
    config: Config,
    backend: Arc<dyn RateLimitBackend>,
) -> Router {
    FluentRouter::without_state(config)
        .expect("Failed to create FluentRouter")
        .with_rate_limit_backend(backend)
        .merge(app_routes())
        .setup_middleware()
        .expect("Failed to setup middleware")
        .into_inner()
}

/// Creates a test router with the payment endpoint mounted on `ledger`.
pub(crate) fn create_payment_router(config: Config, ledger: InMemoryLedger) -> Router {
    FluentRouter::without_state(config)
        .expect("Failed to create FluentRouter")
        .setup_payments(Arc::new(ledger))
        .setup_middleware()
        .expect("Failed to setup middleware")
        .into_inner()
}

// ============================================================================
// Request Helpers
// ============================================================================

/// Creates a GET request to the specified URI.
pub(crate) fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Creates a POST to `uri` on behalf of a caller identified by one header.
pub(crate) fn post_as(uri: &str, header: &str, value: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header, value)
        .body(Body::empty())
        .unwrap()
}

/// Creates a POST with a JSON body.
pub(crate) fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ============================================================================
// Response Helpers
// ============================================================================

/// Extracts the body from a response as a String.
pub(crate) async fn get_body_string(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8_lossy(&body).to_string()
}

/// Extracts the body from a response as JSON.
pub(crate) async fn get_body_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&get_body_string(response).await).unwrap()
}
