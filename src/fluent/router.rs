//! Core FluentRouter struct and initialization methods.

use {
    crate::{
        Config, HttpMiddleware, IdempotencyGuard, RateLimitBackend, RecentKeyStore, Result,
        backend_from_config, store_from_config,
    },
    axum::Router,
    std::sync::Arc,
    tokio_util::sync::CancellationToken,
};

/// Fluent builder for axum::Router with configuration-based admission control.
///
/// This wrapper around `axum::Router` builds the rate-limit backend and the
/// recent-key store described by `[admission]` and wires them into the
/// middleware stack. Create instances using [`FluentRouter::without_state`]
/// or [`FluentRouter::with_state`].
///
/// Both collaborators are shared handles, so handlers that need them (the
/// payment confirmation endpoint, for instance) can be given clones through
/// [`FluentRouter::idempotency_guard`] and [`FluentRouter::rate_limit_backend`].
///
/// ```rust,no_run
/// use axum::routing::post;
/// use axum_bouncer::{Config, FluentRouter};
///
/// # async fn example() -> axum_bouncer::Result<()> {
/// let router = FluentRouter::without_state(Config::default())?;
/// let guard = router.idempotency_guard();
///
/// router
///     .route("/api/generate-plan", post(|| async { "plan" }))
///     .setup_middleware()?
///     .start()
///     .await
/// # }
/// ```
pub struct FluentRouter<State = ()> {
    pub(crate) config: Config,
    pub(crate) state: State,
    pub(crate) inner: Router<State>,
    pub(crate) rate_limit_backend: Arc<dyn RateLimitBackend>,
    pub(crate) idempotency: IdempotencyGuard,
    pub(crate) panic_channel: Option<tokio::sync::mpsc::Sender<String>>,
    pub(crate) cancellation: CancellationToken,
}

impl FluentRouter {
    /// Creates a new `FluentRouter` without application state.
    pub fn without_state(config: Config) -> Result<FluentRouter<()>> {
        FluentRouter::<()>::with_state(config, ())
    }
}

impl<State> FluentRouter<State>
where
    State: Clone + Send + Sync + 'static,
{
    /// Creates a new `FluentRouter` with the provided configuration.
    ///
    /// Validates the configuration, then builds the rate-limit backend and the
    /// recent-key store it selects. Shared stores connect lazily, so an
    /// unreachable Redis does not prevent the router from being built; the
    /// admission middleware degrades instead.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration validation fails
    /// - A Redis backend is selected without the `redis` feature
    /// - The Redis URL cannot be parsed
    pub fn with_state<S: Clone + Send + Sync + 'static>(
        config: Config,
        state: S,
    ) -> Result<FluentRouter<S>> {
        config.validate()?;

        let rate_limit_backend = backend_from_config(&config.admission.rate_limit)?;
        let idempotency = IdempotencyGuard::new(
            store_from_config(&config.admission)?,
            config.admission.idempotency.ttl,
        );

        Ok(FluentRouter {
            config,
            state,
            inner: Router::new(),
            rate_limit_backend,
            idempotency,
            panic_channel: None,
            cancellation: CancellationToken::new(),
        })
    }

    /// Returns the configuration the router was built from.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns a handle to the rate-limit backend used by the admission middleware.
    #[must_use]
    pub fn rate_limit_backend(&self) -> Arc<dyn RateLimitBackend> {
        self.rate_limit_backend.clone()
    }

    /// Returns a handle to the shared duplicate-request guard.
    ///
    /// Clones share the same store, so a key marked through one clone is seen
    /// by all of them.
    #[must_use]
    pub fn idempotency_guard(&self) -> IdempotencyGuard {
        self.idempotency.clone()
    }

    /// Replaces the rate-limit backend built from the configuration.
    ///
    /// Must be called before [`FluentRouter::setup_middleware`].
    #[must_use]
    pub fn with_rate_limit_backend(self, backend: Arc<dyn RateLimitBackend>) -> Self {
        Self {
            rate_limit_backend: backend,
            ..self
        }
    }

    /// Replaces the recent-key store behind [`FluentRouter::idempotency_guard`].
    ///
    /// Guards handed out before this call keep the previous store.
    #[must_use]
    pub fn with_recent_key_store(self, store: Arc<dyn RecentKeyStore>) -> Self {
        let ttl = self.idempotency.default_ttl();
        Self {
            idempotency: IdempotencyGuard::new(store, ttl),
            ..self
        }
    }

    /// Returns a cancellation token that is triggered when shutdown begins.
    ///
    /// Cancelling the token yourself also starts a graceful shutdown of a
    /// running server.
    ///
    /// ```rust,no_run
    /// use axum_bouncer::{Config, FluentRouter};
    /// use std::time::Duration;
    ///
    /// # async fn example() -> axum_bouncer::Result<()> {
    /// let router = FluentRouter::without_state(Config::default())?;
    /// let token = router.cancellation_token();
    ///
    /// tokio::spawn(async move {
    ///     tokio::time::sleep(Duration::from_secs(3600)).await;
    ///     token.cancel();
    /// });
    ///
    /// router.setup_middleware()?.start().await
    /// # }
    /// ```
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Helper method to check if a middleware is enabled in the configuration.
    pub(crate) fn is_middleware_enabled(&self, middleware: HttpMiddleware) -> bool {
        self.config.http.is_middleware_enabled(middleware)
    }

    /// Sets a notification channel for panic messages.
    ///
    /// When configured, any panics caught by the panic handler middleware will
    /// send a message to this channel.
    ///
    /// ```rust,no_run
    /// # use axum_bouncer::{Config, FluentRouter};
    /// # async fn example() -> axum_bouncer::Result<()> {
    /// let (tx, mut rx) = tokio::sync::mpsc::channel(100);
    ///
    /// let router = FluentRouter::without_state(Config::default())?
    ///     .with_panic_notification_channel(tx);
    ///
    /// tokio::spawn(async move {
    ///     while let Some(panic_msg) = rx.recv().await {
    ///         eprintln!("Panic caught: {}", panic_msg);
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn with_panic_notification_channel(self, ch: tokio::sync::mpsc::Sender<String>) -> Self {
        Self {
            panic_channel: Some(ch),
            ..self
        }
    }
}
