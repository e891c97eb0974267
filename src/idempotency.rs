//! Duplicate-request guard.
//!
//! Remembers recently seen fingerprints, such as a payment provider's
//! transaction id, for a short TTL so that a retried or double-submitted
//! request is recognised and not processed twice.
//!
//! The guard is advisory. The in-memory store only covers a single process
//! and the Redis store fails open, so the persistence layer must still carry
//! a uniqueness constraint (see [`crate::payments::PaymentLedger`]).
//!
//! ```
//! use axum_bouncer::{IdempotencyGuard, InMemoryRecentKeys};
//! use std::{sync::Arc, time::Duration};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let guard = IdempotencyGuard::new(Arc::new(InMemoryRecentKeys::new(100)), Duration::from_secs(120));
//! assert!(!guard.seen_recently("pay_29QQoUBi66xm2f", None).await);
//! assert!(guard.seen_recently("pay_29QQoUBi66xm2f", None).await);
//! # }
//! ```

use {
    crate::{
        Result,
        config::{AdmissionConfig, StoreBackend},
    },
    async_trait::async_trait,
    dashmap::{DashMap, mapref::entry::Entry},
    std::{
        sync::{Arc, OnceLock},
        time::Duration,
    },
    tokio::time::Instant,
};

/// Storage for recently seen keys.
#[async_trait]
pub trait RecentKeyStore: Send + Sync + 'static {
    /// Returns true when `key` was marked less than its TTL ago. Otherwise
    /// marks it with `ttl` and returns false. A hit never refreshes the TTL.
    async fn seen_recently(&self, key: &str, ttl: Duration) -> bool;

    /// Forgets a single key, e.g. when the work it guarded failed.
    async fn forget(&self, _key: &str) {}

    /// Forgets every key.
    async fn reset(&self) {}
}

/// Process-local store of recently seen keys.
///
/// Expired entries are pruned on access; nothing runs in the background.
#[derive(Debug, Clone)]
pub struct InMemoryRecentKeys {
    entries: Arc<DashMap<String, Instant>>,
    max_entries: usize,
}

static GLOBAL_RECENT_KEYS: OnceLock<InMemoryRecentKeys> = OnceLock::new();

impl InMemoryRecentKeys {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// The process-wide store, created on first use with 10 000 entries.
    pub fn global() -> &'static InMemoryRecentKeys {
        GLOBAL_RECENT_KEYS.get_or_init(|| InMemoryRecentKeys::new(10_000))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune_expired(&self, now: Instant) {
        self.entries.retain(|_, expires_at| now < *expires_at);
    }

    // Must not be called while holding an entry guard: len() and iter()
    // take every shard lock.
    fn make_room_for(&self, key: &str) {
        if self.entries.len() < self.max_entries || self.entries.contains_key(key) {
            return;
        }
        let earliest = self
            .entries
            .iter()
            .min_by_key(|entry| *entry.value())
            .map(|entry| entry.key().clone());
        if let Some(evicted) = earliest {
            tracing::debug!(key = %evicted, "Recent-key store full, evicting earliest expiry");
            self.entries.remove(&evicted);
        }
    }

    fn check_and_mark(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        self.prune_expired(now);
        self.make_room_for(key);

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if now < *entry.get() {
                    true
                } else {
                    entry.insert(now + ttl);
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now + ttl);
                false
            }
        }
    }
}

impl Default for InMemoryRecentKeys {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl RecentKeyStore for InMemoryRecentKeys {
    async fn seen_recently(&self, key: &str, ttl: Duration) -> bool {
        self.check_and_mark(key, ttl)
    }

    async fn forget(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn reset(&self) {
        self.entries.clear();
    }
}

/// Recent-key store shared by every instance through Redis (`SET NX PX`).
///
/// Store errors are logged and treated as "not seen".
#[cfg(feature = "redis")]
#[derive(Debug, Clone)]
pub struct RedisRecentKeys {
    store: crate::shared_store::SharedStore,
    key_prefix: String,
}

#[cfg(feature = "redis")]
impl RedisRecentKeys {
    pub fn new(store: crate::shared_store::SharedStore, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}:seen:{}", self.key_prefix, key)
    }

    async fn set_if_absent(&self, key: &str, ttl: Duration) -> crate::Result<bool> {
        let mut conn = self.store.connection().await?;
        let stored: Option<String> = redis::cmd("SET")
            .arg(self.store_key(key))
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;
        Ok(stored.is_some())
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl RecentKeyStore for RedisRecentKeys {
    async fn seen_recently(&self, key: &str, ttl: Duration) -> bool {
        match self.set_if_absent(key, ttl).await {
            Ok(inserted) => !inserted,
            Err(err) => {
                tracing::warn!(key, error = %err, "Recent-key lookup failed, treating as unseen");
                false
            }
        }
    }

    async fn forget(&self, key: &str) {
        let result = match self.store.connection().await {
            Ok(mut conn) => redis::cmd("DEL")
                .arg(self.store_key(key))
                .query_async::<i64>(&mut conn)
                .await
                .map_err(crate::Error::from),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            tracing::warn!(key, error = %err, "Failed to forget recent key");
        }
    }
}

/// Builds the recent-key store selected by `[admission.idempotency] store`.
pub fn store_from_config(config: &AdmissionConfig) -> Result<Arc<dyn RecentKeyStore>> {
    match config.idempotency.store {
        StoreBackend::Memory => Ok(Arc::new(InMemoryRecentKeys::new(
            config.idempotency.max_entries,
        ))),
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let url = config.rate_limit.redis_url.as_deref().ok_or_else(|| {
                crate::Error::config("admission.rate_limit.redis_url is required for the redis store")
            })?;
            Ok(Arc::new(RedisRecentKeys::new(
                crate::shared_store::SharedStore::open(url)?,
                config.rate_limit.key_prefix.clone(),
            )))
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => Err(crate::Error::config(
            "admission.idempotency.store = \"redis\" requires the `redis` feature",
        )),
    }
}

/// Answers "was this key seen within its TTL?" against an injected store.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn RecentKeyStore>,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn RecentKeyStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// A guard over [`InMemoryRecentKeys::global`].
    pub fn global(ttl: Duration) -> Self {
        Self::new(Arc::new(InMemoryRecentKeys::global().clone()), ttl)
    }

    /// Returns true if `key` was seen within `ttl` (or the default TTL).
    /// The first sighting returns false and starts the TTL.
    pub async fn seen_recently(&self, key: &str, ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or(self.ttl);
        let seen = self.store.seen_recently(key, ttl).await;
        if seen {
            tracing::info!(key, "Duplicate key seen within TTL");
        }
        seen
    }

    /// Forgets `key` so that the next sighting is treated as the first.
    pub async fn forget(&self, key: &str) {
        self.store.forget(key).await;
    }

    pub async fn reset(&self) {
        self.store.reset().await;
    }

    pub fn default_ttl(&self) -> Duration {
        self.ttl
    }
}

impl std::fmt::Debug for IdempotencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyGuard")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
