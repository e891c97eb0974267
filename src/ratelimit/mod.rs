//! Sliding-window rate limiting.
//!
//! A [`RateLimitBackend`] answers one question per call: may this key be
//! admitted now? Every backend implements a true sliding log of fixed
//! duration, so a key admitted at `T` is refused until `T + window` no matter
//! where `T` falls on the clock. Refused attempts are not recorded.
//!
//! Two backends are provided:
//!
//! - [`InMemoryBackend`] for a single instance and for tests
//! - `RedisBackend` (feature `redis`) shared by every instance behind a load balancer
//!
//! Both report the reset time as epoch milliseconds. [`ResetHint::Raw`] exists
//! for foreign backends whose reset unit has to be inferred from its magnitude.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::InMemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisBackend;

use {
    crate::{
        Result,
        config::{RateLimitConfig, StoreBackend},
    },
    async_trait::async_trait,
    serde::{Serialize, Serializer},
    std::{fmt, sync::Arc, time::Duration},
};

/// Upper bound of the `Retry-After` value handed to clients.
pub const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Identity a quota is tracked against. Authenticated users are preferred
/// over network addresses since many users can share one NAT address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    User(String),
    Ip(String),
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitKey::User(id) => write!(f, "user:{id}"),
            RateLimitKey::Ip(addr) => write!(f, "ip:{addr}"),
        }
    }
}

impl Serialize for RateLimitKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// When the oldest admission in the window expires.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResetHint {
    /// Unix epoch in milliseconds.
    EpochMillis(u64),
    /// A value of unknown unit: milliseconds until reset, epoch seconds or
    /// epoch milliseconds. See [`normalize_reset`].
    Raw(f64),
}

impl fmt::Display for ResetHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetHint::EpochMillis(ms) => write!(f, "{ms}"),
            ResetHint::Raw(value) => write!(f, "{value}"),
        }
    }
}

impl Serialize for ResetHint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ResetHint::EpochMillis(ms) => serializer.serialize_u64(*ms),
            ResetHint::Raw(value) => serializer.serialize_f64(*value),
        }
    }
}

/// Result of a single [`RateLimitBackend::limit`] call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset: ResetHint,
}

/// A sliding-window limiter.
///
/// Implementations must be atomic per call: concurrent calls for the same key
/// from any number of tasks (or instances, for shared stores) never admit
/// more than the quota within one window.
#[async_trait]
pub trait RateLimitBackend: Send + Sync + 'static {
    /// Records an admission for `key` if the quota allows it.
    ///
    /// Errors only when the backend itself fails; a refusal is an `Ok`
    /// outcome with `allowed == false`.
    async fn limit(&self, key: &RateLimitKey) -> Result<RateLimitOutcome>;

    /// Size of the sliding window.
    fn window(&self) -> Duration;
}

/// Builds the backend selected by `config`.
pub fn backend_from_config(config: &RateLimitConfig) -> Result<Arc<dyn RateLimitBackend>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryBackend::new(
            config.window,
            config.max_requests,
        ))),
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                crate::Error::config("admission.rate_limit.redis_url is required for the redis backend")
            })?;
            let store = crate::shared_store::SharedStore::open(url)?;
            Ok(Arc::new(RedisBackend::new(
                store,
                config.key_prefix.clone(),
                config.window,
                config.max_requests,
            )))
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => Err(crate::Error::config(
            "admission.rate_limit.backend = \"redis\" requires the `redis` feature",
        )),
    }
}

///
/// Converts a reset hint to an absolute time in epoch milliseconds.
///
/// Raw values are interpreted by magnitude:
///
/// | value               | meaning                  |
/// |---------------------|--------------------------|
/// | `< 1e6`             | milliseconds until reset |
/// | `1e9 ..< 1e12`      | epoch seconds            |
/// | `>= 1e12`           | epoch milliseconds       |
///
/// Anything else (negative, NaN, infinite, or between 1e6 and 1e9) is
/// unknown and yields `None`.
///
/// ```
/// use axum_bouncer::{ResetHint, normalize_reset};
///
/// let now = 1_700_000_000_000;
/// assert_eq!(normalize_reset(ResetHint::Raw(14_000.0), now), Some(now + 14_000));
/// assert_eq!(normalize_reset(ResetHint::Raw(1_700_000_019.0), now), Some(1_700_000_019_000));
/// assert_eq!(normalize_reset(ResetHint::Raw(5_000_000.0), now), None);
/// ```
pub fn normalize_reset(hint: ResetHint, now_ms: u64) -> Option<u64> {
    match hint {
        ResetHint::EpochMillis(ms) => Some(ms),
        ResetHint::Raw(value) => {
            if !value.is_finite() || value < 0.0 {
                None
            } else if value < 1e6 {
                Some(now_ms.saturating_add(value.ceil() as u64))
            } else if value < 1e9 {
                None
            } else if value < 1e12 {
                Some((value * 1000.0) as u64)
            } else {
                Some(value as u64)
            }
        }
    }
}

///
/// Seconds a client should wait before retrying, always within
/// `0..=MAX_RETRY_AFTER_SECS`.
///
/// A known reset rounds up to the next whole second. An unknown reset falls
/// back to `default`, normally the window size.
///
pub fn retry_after_secs(reset_at_ms: Option<u64>, now_ms: u64, default: Duration) -> u64 {
    let secs = match reset_at_ms {
        Some(reset_at) => reset_at.saturating_sub(now_ms).div_ceil(1000),
        None => default.as_millis().div_ceil(1000) as u64,
    };
    secs.min(MAX_RETRY_AFTER_SECS)
}
