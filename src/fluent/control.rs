//! Traffic control: admission and panic catching.

use super::router::FluentRouter;
use crate::{AdmissionLayer, HttpMiddleware, Result};

use {
    axum::response::Response,
    http::StatusCode,
    tower_http::catch_panic::CatchPanicLayer,
};

impl<State> FluentRouter<State>
where
    State: Clone + Send + Sync + 'static,
{
    /// Sets up the admission middleware on the routes added so far.
    ///
    /// Requests whose path matches `[admission] protected_routes` are counted
    /// against the sliding window of their caller key. Every other route is
    /// left alone, so it is safe to apply this to the whole router.
    ///
    /// ```toml
    /// [admission]
    /// protected_routes = ["/api/generate-plan", "/api/plans/*/export"]
    ///
    /// [admission.rate_limit]
    /// window = "19s"
    /// max_requests = 1
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the identity header name is not a valid header name.
    pub fn setup_admission(mut self) -> Result<Self> {
        if !self.is_middleware_enabled(HttpMiddleware::Admission) {
            return Ok(self);
        }

        if self.config.admission.protected_routes.is_empty() {
            tracing::warn!("Admission enabled but no protected routes configured");
        }

        let layer = AdmissionLayer::new(self.rate_limit_backend.clone(), &self.config.admission)?
            .with_log_admissions(self.config.logging.log_admissions);
        self.inner = self.inner.layer(layer);
        Ok(self)
    }

    /// Sets up panic catching middleware to prevent server crashes.
    ///
    /// Panics inside handlers are turned into a `500 Internal Server Error`
    /// and, when a channel was registered with
    /// [`FluentRouter::with_panic_notification_channel`], reported on it.
    #[must_use]
    pub fn setup_catch_panic(mut self) -> Self {
        if !self.is_middleware_enabled(HttpMiddleware::CatchPanic) {
            return self;
        }

        let panic_channel = self.panic_channel.clone();
        self.inner = self.inner.layer(CatchPanicLayer::custom(
            move |err: Box<dyn std::any::Any + Send + 'static>| {
                let msg = if let Some(s) = err.downcast_ref::<String>() {
                    s.clone()
                } else if let Some(s) = err.downcast_ref::<&str>() {
                    s.to_string()
                } else {
                    "unknown panic payload".to_string()
                };

                tracing::error!("Service panicked: {}", msg);
                if let Some(ch) = &panic_channel {
                    ch.try_send(msg).ok();
                }

                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
                    .body("Internal Server Error".to_string())
                    .unwrap_or_else(|_| Response::new("Internal Server Error".to_string()))
            },
        ));
        self
    }
}
