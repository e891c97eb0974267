//! Request handling: request ID.

use super::router::FluentRouter;
use crate::{HttpMiddleware, utils::RequestIdGenerator};

use {
    http::HeaderName,
    tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
};

impl<State> FluentRouter<State>
where
    State: Clone + Send + Sync + 'static,
{
    /// Sets up `x-request-id` handling.
    ///
    /// An incoming ID is kept; otherwise a UUIDv7 is generated. Either way the
    /// ID is echoed on the response, throttled responses included.
    #[must_use]
    pub fn setup_request_id(mut self) -> Self {
        if !self.is_middleware_enabled(HttpMiddleware::RequestId) {
            return self;
        }

        // The setter must be outermost so the propagator sees generated IDs.
        let x_request_id = HeaderName::from_static("x-request-id");
        self.inner = self
            .inner
            .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
            .layer(SetRequestIdLayer::new(x_request_id, RequestIdGenerator));
        self
    }
}
