//! Orchestration and router delegation: setup_middleware(), start(), layer(), route(), etc.

use super::router::FluentRouter;
use crate::Result;

use {
    axum::{Router, body::Body, routing::Route},
    http::Request,
    std::{convert::Infallible, net::SocketAddr},
    tokio::signal,
    tokio_util::sync::CancellationToken,
    tower::{Layer, Service},
};

impl<State> FluentRouter<State>
where
    State: Clone + Send + Sync + 'static,
{
    /// Sets up all standard middleware layers in the correct order.
    ///
    /// Call this **after** adding your routes: the admission layer only wraps
    /// routes that already exist on the router.
    ///
    /// # Middleware Order
    ///
    /// The **last layer added is the outermost layer** and executes **first** on
    /// incoming requests.
    ///
    /// The current order (from innermost to outermost):
    /// 1. **Admission** - Rate limits protected routes, tags responses with `X-Bouncer`
    /// 2. **Logging** - Log all requests, including throttled ones
    /// 3. **Readiness** - `/ready`, behind the timeout
    /// 4. **Timeout** - Set timeout boundary for everything (optional)
    /// 5. **Request ID** - Generate/extract ID for tracing
    /// 6. **Liveness** - `/live`, always accessible
    /// 7. **Panic catching** - Catch ALL panics from inner layers (outermost)
    ///
    /// Throttled responses are produced inside the logging and request ID
    /// layers, so they carry an `x-request-id` and show up in the request log.
    ///
    /// # Manual Setup
    ///
    /// Call the individual `setup_*` methods in the same order (first call =
    /// innermost layer). Use `[http] include/exclude` to leave layers out.
    ///
    /// ```rust,no_run
    /// # use axum_bouncer::{Config, FluentRouter, Result};
    /// # fn example() -> Result<()> {
    /// let router = FluentRouter::without_state(Config::default())?
    ///     .setup_admission()?
    ///     .setup_logging()
    ///     .setup_readiness()
    ///     .setup_timeout()
    ///     .setup_request_id()
    ///     .setup_liveness()
    ///     .setup_catch_panic();
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the admission layer cannot be built from the
    /// configuration (e.g. an invalid identity header name).
    pub fn setup_middleware(self) -> Result<Self> {
        const PACKAGE_NAME: &str = env!("CARGO_PKG_NAME");
        const VERSION: &str = env!("CARGO_PKG_VERSION");
        tracing::info!("Starting {PACKAGE_NAME} version {VERSION}...");

        let router = self
            .setup_admission()? // 1. Admission control on protected routes
            .setup_logging() // 2. Request/response logging
            .setup_readiness() // 3. Readiness endpoint
            .setup_timeout() // 4. Request timeout (optional)
            .setup_request_id() // 5. Request ID
            .setup_liveness() // 6. Liveness endpoint
            .setup_catch_panic(); // 7. Outermost - panic recovery

        Ok(router)
    }

    /// Starts the HTTP server based on the current configuration.
    ///
    /// The server is started with `ConnectInfo<SocketAddr>` so that the
    /// connection address can serve as an identity of last resort.
    ///
    /// Shutdown starts on SIGTERM, SIGINT (Ctrl+C) or when the router's
    /// [`CancellationToken`] is cancelled. In-flight requests are then given
    /// `http.shutdown_timeout` to drain before the server stops regardless.
    pub async fn start(self) -> Result<()> {
        let bind_addr = self.config.http.full_bind_addr();
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

        tracing::info!("Bound to {}", &bind_addr);
        tracing::info!(
            window = ?self.rate_limit_backend.window(),
            max_requests = self.config.admission.rate_limit.max_requests,
            "Waiting for connections"
        );

        let service = self
            .inner
            .with_state(self.state)
            .into_make_service_with_connect_info::<SocketAddr>();

        let shutdown_timeout = self.config.http.shutdown_timeout;
        let cancellation = self.cancellation.clone();

        let serve_future = axum::serve(listener, service)
            .with_graceful_shutdown(shutdown_signal(self.cancellation));

        // The timeout only starts once shutdown has been initiated.
        tokio::select! {
            result = serve_future => {
                tracing::info!("Graceful shutdown completed");
                result?;
            }
            _ = async {
                cancellation.cancelled().await;
                tokio::time::sleep(shutdown_timeout).await;
            } => {
                tracing::warn!("Graceful shutdown timeout expired, forcing shutdown");
            }
        }

        Ok(())
    }

    /// Adds a layer to the router.
    ///
    /// Like `axum::Router::layer`, the layer only wraps routes added before it.
    pub fn layer<L>(mut self, layer: L) -> Self
    where
        L: Layer<Route> + Clone + Send + Sync + 'static,
        L::Service: Service<Request<Body>> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request<Body>>>::Response: axum::response::IntoResponse + 'static,
        <L::Service as Service<Request<Body>>>::Error: Into<Infallible> + 'static,
        <L::Service as Service<Request<Body>>>::Future: Send + 'static,
    {
        self.inner = self.inner.layer(layer);
        self
    }

    /// Adds a route to the router.
    pub fn route(mut self, path: &str, route: axum::routing::MethodRouter<State>) -> Self {
        self.inner = self.inner.route(path, route);
        self
    }

    /// Adds a layer that only runs for requests that matched a route.
    pub fn route_layer<L>(mut self, layer: L) -> Self
    where
        L: Layer<Route> + Clone + Send + Sync + 'static,
        L::Service: Service<Request<Body>> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request<Body>>>::Response: axum::response::IntoResponse + 'static,
        <L::Service as Service<Request<Body>>>::Error: Into<Infallible> + 'static,
        <L::Service as Service<Request<Body>>>::Future: Send + 'static,
    {
        self.inner = self.inner.route_layer(layer);
        self
    }

    /// Nests a router at `path`.
    pub fn nest(mut self, path: &str, router: Router<State>) -> Self {
        self.inner = self.inner.nest(path, router);
        self
    }

    /// Nests a service at `path`.
    pub fn nest_service<T>(mut self, path: &str, service: T) -> Self
    where
        T: Service<Request<Body>, Response = axum::response::Response, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        T::Future: Send + 'static,
    {
        self.inner = self.inner.nest_service(path, service);
        self
    }

    /// Merges the routes of another router into this one.
    pub fn merge(mut self, other: Router<State>) -> Self {
        self.inner = self.inner.merge(other);
        self
    }

    /// Routes `path` to a service.
    pub fn route_service<T>(mut self, path: &str, service: T) -> Self
    where
        T: Service<Request<Body>, Response = axum::response::Response, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        T::Future: Send + 'static,
    {
        self.inner = self.inner.route_service(path, service);
        self
    }

    /// Consumes the `FluentRouter` and returns the inner `axum::Router`.
    ///
    /// Useful for tests driving the router with `oneshot()`. The state has
    /// not been applied yet, so call `with_state` on the result if needed.
    pub fn into_inner(self) -> Router<State> {
        self.inner
    }
}

/// Resolves once SIGTERM, SIGINT or the cancellation token fires, and
/// cancels the token so that every holder sees the shutdown.
///
/// If a signal handler cannot be installed, a warning is logged and that
/// signal is ignored.
pub(crate) async fn shutdown_signal(cancellation: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => tracing::debug!("Ctrl+C signal received"),
            Err(err) => {
                tracing::warn!("Failed to install Ctrl+C handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal_handler) => {
                signal_handler.recv().await;
                tracing::debug!("SIGTERM signal received");
            }
            Err(err) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = cancellation.cancelled() => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
    cancellation.cancel();
}
