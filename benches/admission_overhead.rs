//! Benchmarks for measuring admission overhead.
//!
//! These benchmarks measure the latency the admission middleware adds on top
//! of a bare axum router, and the cost of the in-memory stores on their own.

use axum::{Router, body::Body, http::Request, routing::get};
use axum_bouncer::{
    Config, FluentRouter, HttpMiddleware, IdempotencyGuard, InMemoryBackend, InMemoryRecentKeys,
    RateLimitBackend, RateLimitKey,
};
use criterion::{Criterion, criterion_group, criterion_main};
use std::{
    hint::black_box,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tower::ServiceExt;

/// Simple handler that returns immediately
async fn handler() -> &'static str {
    "OK"
}

fn test_request(path: &str, user: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .header("x-user-id", user)
        .body(Body::empty())
        .unwrap()
}

fn admission_router(window: Duration) -> Router {
    let config = Config::default()
        .with_protected_routes(["/protected"])
        .with_rate_limit_window(window)
        .with_included_middlewares(vec![HttpMiddleware::Admission]);

    FluentRouter::without_state(config)
        .unwrap()
        .route("/protected", get(handler))
        .route("/open", get(handler))
        .setup_middleware()
        .unwrap()
        .into_inner()
}

/// Benchmark: Bare axum router (no admission)
fn bench_bare_axum(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let router = Router::new().route("/open", get(handler));

    c.bench_function("bare_axum", |b| {
        b.to_async(&rt).iter(|| async {
            let response = router
                .clone()
                .oneshot(test_request("/open", "42"))
                .await
                .unwrap();
            black_box(response)
        })
    });
}

/// Benchmark: the three paths through the admission middleware
fn bench_admission_paths(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("admission");

    // Unprotected route: only the route match is paid for
    {
        let router = admission_router(Duration::from_secs(19));
        group.bench_function("bypass", |b| {
            b.to_async(&rt).iter(|| async {
                let response = router
                    .clone()
                    .oneshot(test_request("/open", "42"))
                    .await
                    .unwrap();
                black_box(response)
            })
        });
    }

    // Same key over and over: every call after the first is throttled
    {
        let router = admission_router(Duration::from_secs(19));
        group.bench_function("throttled", |b| {
            b.to_async(&rt).iter(|| async {
                let response = router
                    .clone()
                    .oneshot(test_request("/protected", "42"))
                    .await
                    .unwrap();
                black_box(response)
            })
        });
    }

    // A fresh key per call: every call is admitted
    {
        let router = admission_router(Duration::from_millis(10));
        let counter = Arc::new(AtomicU64::new(0));
        group.bench_function("admitted", |b| {
            b.to_async(&rt).iter(|| {
                let user = counter.fetch_add(1, Ordering::Relaxed).to_string();
                let router = router.clone();
                async move {
                    let response = router
                        .oneshot(test_request("/protected", &user))
                        .await
                        .unwrap();
                    black_box(response)
                }
            })
        });
    }

    group.finish();
}

/// Benchmark: stores without the HTTP stack
fn bench_stores(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("stores");

    {
        let backend = InMemoryBackend::new(Duration::from_secs(19), 1);
        let key = RateLimitKey::User("42".into());
        group.bench_function("sliding_log_limit", |b| {
            b.to_async(&rt)
                .iter(|| async { black_box(backend.limit(&key).await.unwrap()) })
        });
    }

    {
        let guard = IdempotencyGuard::new(
            Arc::new(InMemoryRecentKeys::new(10_000)),
            Duration::from_secs(120),
        );
        group.bench_function("seen_recently", |b| {
            b.to_async(&rt)
                .iter(|| async { black_box(guard.seen_recently("razorpay:pay_1", None).await) })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_bare_axum, bench_admission_paths, bench_stores);
criterion_main!(benches);
