//! # axum-bouncer
//!
//! Admission control for Axum services that front expensive work, such as a
//! handler that calls a paid model API.
//!
//! It has three parts, all configured through TOML:
//! - a sliding-window rate limiter keyed by caller (authenticated user id,
//!   else client IP). It runs in memory or on Redis shared across instances;
//! - a duplicate-request guard answering "was this key seen within its TTL?",
//!   used by the payment confirmation endpoint;
//! - an admission middleware that applies the limiter to protected routes,
//!   answers `429` with `Retry-After` when a caller is over quota, and fails
//!   open (tagged `X-Bouncer: degraded`) when the backend is down.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use axum::routing::post;
//! use axum_bouncer::{Config, FluentRouter, Result};
//!
//! async fn generate_plan() -> &'static str {
//!     "your plan"
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_rust_env_or_default();
//!     config.setup_tracing();
//!
//!     FluentRouter::without_state(config)?
//!         .route("/api/generate-plan", post(generate_plan))
//!         .setup_middleware()?
//!         .start()
//!         .await
//! }
//! ```
//!
//! With `config/dev.toml`:
//! ```toml
//! [http]
//! bind_port = 3000
//!
//! [admission]
//! protected_routes = ["/api/generate-plan"]
//!
//! [admission.rate_limit]
//! window = "19s"
//! max_requests = 1
//! ```
//!
//! Run with `RUST_ENV=dev cargo run`.
//!
//! # What You Get
//!
//! | Feature | Description | Default |
//! |---------|-------------|---------|
//! | Admission | Sliding-window limit on protected routes | 1 request / 19s |
//! | Idempotency | Recent-key guard for payment confirmations | 120s TTL |
//! | Health probes | `/live` and `/ready` endpoints | Enabled |
//! | Request logging | Structured logs with UUIDv7 correlation IDs | Enabled |
//! | Panic recovery | Catches panics, returns 500, keeps running | Enabled |
//! | Graceful shutdown | Handles SIGTERM, drains connections | 30s timeout |
//!
//! # Cargo Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `redis` | Redis-backed sliding window and recent-key store |
//!
//! # Configuration
//!
//! ```rust
//! use axum_bouncer::Config;
//! use std::time::Duration;
//!
//! // From string (useful for tests)
//! let config: Config = r#"
//!     [admission.rate_limit]
//!     window = "10s"
//!     max_requests = 3
//! "#.parse().unwrap();
//! assert_eq!(config.admission.rate_limit.max_requests, 3);
//!
//! // With builder methods
//! let config = Config::default()
//!     .with_bind_port(8080)
//!     .with_rate_limit_window(Duration::from_secs(19))
//!     .with_request_timeout(Duration::from_secs(30));
//! ```
//!
//! Environment variables can be referenced as `{{ VAR_NAME }}`:
//!
//! ```toml
//! [admission.rate_limit]
//! backend = "redis"
//! redis_url = "{{ REDIS_URL }}"
//!
//! [payments]
//! razorpay_key_secret = "{{ RAZORPAY_KEY_SECRET }}"
//! ```
//!
//! # Error Handling
//!
//! The library uses a custom [`Result`] type. Errors convert to structured JSON responses:
//!
//! ```json
//! {
//!   "error_code": "AUTH_ERROR",
//!   "message": "Invalid payment signature"
//! }
//! ```
//!
//! A throttled request is not an error: the admission middleware answers it
//! with `{"error": "Too many requests. Please wait 14s before generating another plan."}`.
//!
//! ## Middleware Control
//!
//! Enable or disable specific middleware:
//!
//! ```toml
//! [http]
//! exclude = ["timeout"]
//! ```
mod admission;
mod config;
mod error;
mod fluent;
mod idempotency;
mod payments;
mod ratelimit;
mod utils;

#[cfg(feature = "redis")]
mod shared_store;

pub use admission::*;
pub use config::*;
pub use error::*;
pub use fluent::*;
pub use idempotency::*;
pub use payments::*;
pub use ratelimit::*;
pub use utils::*;

#[cfg(feature = "redis")]
pub use shared_store::SharedStore;

pub type Result<T> = std::result::Result<T, Error>;
