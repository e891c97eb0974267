//! Observability: request logging.

use super::router::FluentRouter;
use crate::HttpMiddleware;

use {
    axum::body::Body,
    http::Request,
    tower_http::trace::TraceLayer,
};

impl<State> FluentRouter<State>
where
    State: Clone + Send + Sync + 'static,
{
    /// Sets up request logging through `tower_http::trace::TraceLayer`.
    ///
    /// Each request runs inside an `http_request` span carrying the method,
    /// URI and request ID. The admission middleware records the caller key on
    /// the same span as `rate_limit_key`, so throttling decisions can be traced
    /// back to a caller.
    ///
    /// Requires the request ID middleware, which is checked when the
    /// configuration is validated.
    #[must_use]
    pub fn setup_logging(mut self) -> Self {
        if !self.is_middleware_enabled(HttpMiddleware::Logging) {
            return self;
        }

        self.inner = self.inner.layer(TraceLayer::new_for_http().make_span_with(
            |request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");

                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                    rate_limit_key = tracing::field::Empty,
                )
            },
        ));

        self
    }
}
