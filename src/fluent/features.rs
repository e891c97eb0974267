//! Features: timeout and health probes.

use super::router::FluentRouter;
use crate::{HttpMiddleware, PaymentLedger, PaymentState, payment_routes};

use {
    axum::routing::get,
    http::StatusCode,
    std::sync::Arc,
    tower_http::timeout::TimeoutLayer,
};

impl<State> FluentRouter<State>
where
    State: Clone + Send + Sync + 'static,
{
    /// Sets up the request timeout configured by `http.request_timeout`.
    ///
    /// Requests that take longer are answered with `408 Request Timeout`.
    /// Without a configured timeout this is a no-op.
    #[must_use]
    pub fn setup_timeout(mut self) -> Self {
        if !self.is_middleware_enabled(HttpMiddleware::Timeout) {
            return self;
        }

        if let Some(timeout) = self.config.http.request_timeout {
            self.inner = self.inner.layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                timeout,
            ));
        }
        self
    }

    /// Adds the liveness probe at `http.liveness_route` (default `/live`).
    #[must_use]
    pub fn setup_liveness(mut self) -> Self {
        if !self.is_middleware_enabled(HttpMiddleware::Liveness) {
            return self;
        }

        let route = self.config.http.liveness_route.clone();
        self.inner = self.inner.route(&route, get(|| async { "OK\n" }));
        self
    }

    /// Adds the readiness probe at `http.readiness_route` (default `/ready`).
    ///
    /// Shared stores connect lazily and the admission middleware fails open,
    /// so readiness does not depend on the rate-limit backend.
    #[must_use]
    pub fn setup_readiness(mut self) -> Self {
        if !self.is_middleware_enabled(HttpMiddleware::Readiness) {
            return self;
        }

        let route = self.config.http.readiness_route.clone();
        self.inner = self
            .inner
            .route(&route, get(|| async { (StatusCode::OK, "OK\n") }));
        self
    }

    /// Mounts the payment confirmation endpoint.
    ///
    /// The endpoint shares the router's [`IdempotencyGuard`](crate::IdempotencyGuard)
    /// and verifies signatures with `payments.razorpay_key_secret` when set.
    /// Add it before [`FluentRouter::setup_middleware`] so it is logged and
    /// covered by the timeout.
    #[must_use]
    pub fn setup_payments(mut self, ledger: Arc<dyn PaymentLedger>) -> Self {
        let state = PaymentState::new(
            self.idempotency.clone(),
            ledger,
            self.config.payments.key_secret(),
        );
        self.inner = self.inner.merge(payment_routes(state));
        self
    }
}
