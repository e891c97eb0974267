//! Admission middleware.
//!
//! [`AdmissionLayer`] guards a configured set of routes. For every request on
//! a protected route it derives the caller key, asks the rate-limit backend
//! for an admission and then either
//!
//! - forwards the request, adding `X-RateLimit-*` headers and `X-Bouncer: hit`
//!   to the response, with an [`Admission`] record in the request extensions;
//! - answers `429 Too Many Requests` with `{"error": "..."}`, the same headers,
//!   `Retry-After` and `X-Bouncer: limited`;
//! - or, when the backend fails, follows [`OnBackendError`]: forward the
//!   request tagged `X-Bouncer: degraded`, or answer `503`.
//!
//! Requests on any other route pass through untouched.

mod identity;
mod routes;

pub use identity::*;
pub use routes::*;

use {
    crate::{
        Result,
        config::{AdmissionConfig, OnBackendError},
        ratelimit::{
            RateLimitBackend, RateLimitKey, RateLimitOutcome, normalize_reset, retry_after_secs,
        },
        utils::{epoch_millis_now, format_epoch_millis},
    },
    axum::{
        Json,
        extract::Request,
        response::{IntoResponse, Response},
    },
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header::RETRY_AFTER},
    serde::Serialize,
    serde_json::json,
    std::{
        future::Future,
        pin::Pin,
        sync::Arc,
        task::{Context, Poll},
    },
    tower::{Layer, Service},
};

pub const X_BOUNCER: HeaderName = HeaderName::from_static("x-bouncer");
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_RATELIMIT_RESET_AT: HeaderName = HeaderName::from_static("x-ratelimit-reset-at");

const BOUNCER_HIT: HeaderValue = HeaderValue::from_static("hit");
const BOUNCER_LIMITED: HeaderValue = HeaderValue::from_static("limited");
const BOUNCER_DEGRADED: HeaderValue = HeaderValue::from_static("degraded");

const UNAVAILABLE_MESSAGE: &str =
    "Rate limiting is temporarily unavailable. Please retry shortly.";

/// Inserted into the request extensions of every admitted request.
///
/// Requests admitted unprotected because the backend failed carry no record;
/// read it with `request.extensions().get::<Admission>()` where that matters.
///
/// ```
/// use axum::{Extension, Json};
/// use axum_bouncer::Admission;
///
/// async fn generate_plan(Extension(admission): Extension<Admission>) -> Json<Admission> {
///     Json(admission)
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub key: RateLimitKey,
    pub outcome: RateLimitOutcome,
}

struct AdmissionState {
    backend: Arc<dyn RateLimitBackend>,
    identity: IdentityChain,
    routes: ProtectedRoutes,
    on_backend_error: OnBackendError,
    denial_message: String,
}

impl AdmissionState {
    fn denial_message(&self, retry_after: u64) -> String {
        self.denial_message
            .replace("{retry_after}", &retry_after.to_string())
    }

    fn default_retry_after(&self) -> u64 {
        retry_after_secs(None, 0, self.backend.window())
    }
}

/// Layer that applies the admission middleware.
#[derive(Clone)]
pub struct AdmissionLayer {
    state: Arc<AdmissionState>,
    log_admissions: bool,
}

impl AdmissionLayer {
    pub fn new(backend: Arc<dyn RateLimitBackend>, config: &AdmissionConfig) -> Result<Self> {
        Ok(Self {
            state: Arc::new(AdmissionState {
                backend,
                identity: IdentityChain::from_config(config)?,
                routes: ProtectedRoutes::new(&config.protected_routes),
                on_backend_error: config.on_backend_error,
                denial_message: config.denial_message.clone(),
            }),
            log_admissions: false,
        })
    }

    /// Logs admitted requests at `info` instead of `debug`.
    #[must_use]
    pub fn with_log_admissions(self, enabled: bool) -> Self {
        Self {
            log_admissions: enabled,
            ..self
        }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            state: self.state.clone(),
            log_admissions: self.log_admissions,
        }
    }
}

/// Service that runs the admission check before the wrapped service.
#[derive(Clone)]
pub struct AdmissionService<S> {
    inner: S,
    state: Arc<AdmissionState>,
    log_admissions: bool,
}

impl<S> Service<Request> for AdmissionService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let state = self.state.clone();
        let log_admissions = self.log_admissions;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if !state.routes.matches(req.uri().path()) {
                return inner.call(req).await;
            }

            let key = state.identity.derive(req.headers(), req.extensions());
            tracing::Span::current().record("rate_limit_key", tracing::field::display(&key));

            let outcome = match state.backend.limit(&key).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    return match state.on_backend_error {
                        OnBackendError::AllowAndTag => {
                            tracing::warn!(
                                key = %key,
                                error = %err,
                                "Rate-limit backend failed, admitting request unprotected"
                            );
                            let mut response = inner.call(req).await?;
                            response.headers_mut().insert(X_BOUNCER, BOUNCER_DEGRADED);
                            Ok(response)
                        }
                        OnBackendError::Deny => {
                            tracing::error!(
                                key = %key,
                                error = %err,
                                "Rate-limit backend failed, rejecting request"
                            );
                            Ok(unavailable_response(state.default_retry_after()))
                        }
                    };
                }
            };

            let now = epoch_millis_now();
            let reset_at = normalize_reset(outcome.reset, now);
            let retry_after = retry_after_secs(reset_at, now, state.backend.window());

            if !outcome.allowed {
                tracing::warn!(
                    key = %key,
                    remaining = outcome.remaining,
                    retry_after,
                    "Request throttled"
                );
                let body = json!({ "error": state.denial_message(retry_after) });
                let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                let headers = response.headers_mut();
                insert_rate_limit_headers(headers, &outcome, reset_at);
                headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
                headers.insert(X_BOUNCER, BOUNCER_LIMITED);
                return Ok(response);
            }

            if log_admissions {
                tracing::info!(key = %key, remaining = outcome.remaining, "Request admitted");
            } else {
                tracing::debug!(key = %key, remaining = outcome.remaining, "Request admitted");
            }

            req.extensions_mut().insert(Admission { key, outcome });
            let mut response = inner.call(req).await?;
            let headers = response.headers_mut();
            insert_rate_limit_headers(headers, &outcome, reset_at);
            headers.insert(X_BOUNCER, BOUNCER_HIT);
            Ok(response)
        })
    }
}

fn insert_rate_limit_headers(
    headers: &mut HeaderMap,
    outcome: &RateLimitOutcome,
    reset_at: Option<u64>,
) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(outcome.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(outcome.remaining));

    let reset = match reset_at {
        Some(ms) => HeaderValue::from(ms),
        None => match HeaderValue::from_str(&outcome.reset.to_string()) {
            Ok(value) => value,
            Err(_) => return,
        },
    };
    headers.insert(X_RATELIMIT_RESET, reset);

    if let Some(ms) = reset_at
        && let Ok(value) = HeaderValue::from_str(&format_epoch_millis(ms))
    {
        headers.insert(X_RATELIMIT_RESET_AT, value);
    }
}

fn unavailable_response(retry_after: u64) -> Response {
    let body = json!({ "error": UNAVAILABLE_MESSAGE });
    let mut response = (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    headers.insert(X_BOUNCER, BOUNCER_DEGRADED);
    response
}
