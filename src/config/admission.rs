use {
    crate::{Error, Result},
    http::HeaderName,
    serde::Deserialize,
    std::time::Duration,
};

///
/// Configuration for the admission middleware and its collaborators.
///
/// ```toml
/// [admission]
/// protected_routes = ["/api/generate-plan", "/api/rl-probe"]
/// identity_sources = ["identity-header", "forwarded-for", "real-ip", "connection"]
/// on_backend_error = "allow-and-tag"
///
/// [admission.rate_limit]
/// backend = "redis"
/// redis_url = "{{ REDIS_URL }}"
/// window = "19s"
/// max_requests = 1
///
/// [admission.idempotency]
/// ttl = "2m"
/// ```
///
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Route patterns guarded by the admission middleware. Segments match
    /// literally, `*` matches exactly one segment and a trailing `**` matches
    /// any remainder. Every other route bypasses admission.
    #[serde(default = "AdmissionConfig::default_protected_routes")]
    pub protected_routes: Vec<String>,

    /// Ordered list of places to derive the caller identity from. The first
    /// source that yields a value wins; when none does the caller is keyed
    /// as `ip:127.0.0.1`.
    #[serde(default = "AdmissionConfig::default_identity_sources")]
    pub identity_sources: Vec<IdentitySourceConfig>,

    /// Header carrying the authenticated user id, set by an upstream
    /// authentication layer. Defaults to `x-user-id`.
    #[serde(default = "AdmissionConfig::default_identity_header")]
    pub identity_header: String,

    /// What to do when the rate-limit backend fails.
    #[serde(default)]
    pub on_backend_error: OnBackendError,

    /// Message returned in the 429 body. `{retry_after}` is replaced with
    /// the number of seconds to wait.
    #[serde(default = "AdmissionConfig::default_denial_message")]
    pub denial_message: String,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub idempotency: IdempotencyConfig,
}

impl AdmissionConfig {
    fn default_protected_routes() -> Vec<String> {
        vec!["/api/generate-plan".into(), "/api/rl-probe".into()]
    }

    fn default_identity_sources() -> Vec<IdentitySourceConfig> {
        vec![
            IdentitySourceConfig::IdentityHeader,
            IdentitySourceConfig::ForwardedFor,
            IdentitySourceConfig::RealIp,
            IdentitySourceConfig::PlatformForwardedFor,
            IdentitySourceConfig::CdnClientIp,
            IdentitySourceConfig::Connection,
        ]
    }

    fn default_identity_header() -> String {
        "x-user-id".into()
    }

    fn default_denial_message() -> String {
        "Too many requests. Please wait {retry_after}s before generating another plan.".into()
    }

    pub fn validate(&self) -> Result<()> {
        for route in &self.protected_routes {
            if !route.starts_with('/') {
                return Err(Error::invalid_input(format!(
                    "Protected route '{route}' must start with '/'"
                )));
            }
            let segments: Vec<&str> = route.split('/').collect();
            let last = segments.len() - 1;
            if segments.iter().position(|s| *s == "**").is_some_and(|pos| pos != last) {
                return Err(Error::invalid_input(format!(
                    "Protected route '{route}' may only use '**' as its last segment"
                )));
            }
        }

        HeaderName::try_from(self.identity_header.as_str()).map_err(|_| {
            Error::invalid_input(format!(
                "admission.identity_header '{}' is not a valid header name",
                self.identity_header
            ))
        })?;

        self.rate_limit.validate()?;
        self.idempotency.validate()?;

        if self.idempotency.store == StoreBackend::Redis && self.rate_limit.redis_url.is_none() {
            return Err(Error::invalid_input(
                "admission.idempotency.store = \"redis\" requires admission.rate_limit.redis_url",
            ));
        }

        Ok(())
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            protected_routes: Self::default_protected_routes(),
            identity_sources: Self::default_identity_sources(),
            identity_header: Self::default_identity_header(),
            on_backend_error: OnBackendError::default(),
            denial_message: Self::default_denial_message(),
            rate_limit: RateLimitConfig::default(),
            idempotency: IdempotencyConfig::default(),
        }
    }
}

/// A place the caller identity can be read from.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IdentitySourceConfig {
    /// The configured identity header (`user:<id>`).
    IdentityHeader,
    /// First entry of `x-forwarded-for`.
    ForwardedFor,
    /// `x-real-ip`.
    RealIp,
    /// First entry of `x-vercel-forwarded-for`.
    PlatformForwardedFor,
    /// `cf-connecting-ip`.
    CdnClientIp,
    /// Peer address of the TCP connection.
    Connection,
}

/// Behavior of the admission middleware when the rate-limit backend fails.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OnBackendError {
    /// Forward the request, tagged with `X-Bouncer: degraded`.
    #[default]
    AllowAndTag,
    /// Reject the request with 503 Service Unavailable.
    Deny,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

///
/// Sliding window rate limiting. By default one admission per caller every
/// 19 seconds.
///
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL of the shared store, e.g. `redis://cache:6379/0`.
    /// Usually supplied through `{{ REDIS_URL }}`.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix of every key written to the shared store.
    #[serde(default = "RateLimitConfig::default_key_prefix")]
    pub key_prefix: String,

    #[serde(default = "RateLimitConfig::default_window", with = "humantime_serde")]
    pub window: Duration,

    #[serde(default = "RateLimitConfig::default_max_requests")]
    pub max_requests: u32,
}

impl RateLimitConfig {
    fn default_key_prefix() -> String {
        "bouncer".into()
    }

    fn default_window() -> Duration {
        Duration::from_secs(19)
    }

    fn default_max_requests() -> u32 {
        1
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(Error::invalid_input(
                "admission.rate_limit.max_requests must be > 0",
            ));
        }
        if self.window.is_zero() {
            return Err(Error::invalid_input(
                "admission.rate_limit.window must be greater than zero",
            ));
        }
        if self.window.as_millis() < 1 {
            return Err(Error::invalid_input(
                "admission.rate_limit.window must be at least one millisecond",
            ));
        }
        if self.backend == StoreBackend::Redis {
            if cfg!(not(feature = "redis")) {
                return Err(Error::config(
                    "admission.rate_limit.backend = \"redis\" requires the `redis` feature",
                ));
            }
            match &self.redis_url {
                None => {
                    return Err(Error::invalid_input(
                        "admission.rate_limit.redis_url is required when backend = \"redis\"",
                    ));
                }
                Some(url) => {
                    url::Url::parse(url)?;
                }
            }
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: None,
            key_prefix: Self::default_key_prefix(),
            window: Self::default_window(),
            max_requests: Self::default_max_requests(),
        }
    }
}

///
/// Duplicate-request guard settings.
///
#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    /// Where recently seen keys are remembered. The redis store reuses
    /// `admission.rate_limit.redis_url`.
    #[serde(default)]
    pub store: StoreBackend,

    /// How long a key is remembered. Defaults to two minutes.
    #[serde(default = "IdempotencyConfig::default_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// Upper bound of the in-memory store. When full, the entry closest to
    /// expiring is evicted first.
    #[serde(default = "IdempotencyConfig::default_max_entries")]
    pub max_entries: usize,
}

impl IdempotencyConfig {
    fn default_ttl() -> Duration {
        Duration::from_secs(120)
    }

    fn default_max_entries() -> usize {
        10_000
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(Error::invalid_input(
                "admission.idempotency.ttl must be greater than zero",
            ));
        }
        if self.max_entries == 0 {
            return Err(Error::invalid_input(
                "admission.idempotency.max_entries must be > 0",
            ));
        }
        if self.store == StoreBackend::Redis && cfg!(not(feature = "redis")) {
            return Err(Error::config(
                "admission.idempotency.store = \"redis\" requires the `redis` feature",
            ));
        }
        Ok(())
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::default(),
            ttl: Self::default_ttl(),
            max_entries: Self::default_max_entries(),
        }
    }
}
