//! A plan-generation service guarded by axum-bouncer.
//!
//! Run with `RUST_ENV=dev cargo run --example plan_service` and try:
//!
//! ```text
//! curl -i -X POST -H 'x-user-id: 42' localhost:3000/api/generate-plan
//! curl -i -X POST -H 'x-user-id: 42' localhost:3000/api/generate-plan   # 429
//! ```

use axum::{
    Json,
    body::Body,
    http::Request,
    routing::post,
};
use axum_bouncer::{Admission, Config, FluentRouter, InMemoryLedger, Result};
use serde_json::{Value, json};
use std::sync::Arc;

/// Stands in for the expensive model call the limiter protects.
async fn generate_plan(request: Request<Body>) -> Json<Value> {
    let caller = request
        .extensions()
        .get::<Admission>()
        .map(|admission| admission.key.to_string())
        .unwrap_or_else(|| "unprotected".into());

    tracing::info!(caller, "Generating plan");
    Json(json!({
        "plan": ["Warm up 10 min", "Intervals 6x400m", "Cool down 10 min"],
        "caller": caller,
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_rust_env_or_default();
    config.setup_tracing();

    FluentRouter::without_state(config)?
        .route("/api/generate-plan", post(generate_plan))
        .setup_payments(Arc::new(InMemoryLedger::new()))
        .setup_middleware()?
        .start()
        .await
}
