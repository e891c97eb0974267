use {
    super::{RateLimitBackend, RateLimitKey, RateLimitOutcome, ResetHint},
    crate::{Result, shared_store::SharedStore},
    async_trait::async_trait,
    redis::Script,
    std::{sync::LazyLock, time::Duration},
    uuid::Uuid,
};

// Sliding log over a sorted set scored by admission time (ms, from the
// server clock so every instance agrees). Returns {allowed, remaining, reset_ms}.
const SLIDING_LOG_LUA: &str = r#"
local key = KEYS[1]
local window = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local member = ARGV[3]

local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local allowed = 0
if count < limit then
  redis.call('ZADD', key, now, member)
  count = count + 1
  allowed = 1
end
redis.call('PEXPIRE', key, window)

local reset = now + window
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if oldest[2] then
  reset = tonumber(oldest[2]) + window
end
return {allowed, limit - count, reset}
"#;

static SLIDING_LOG: LazyLock<Script> = LazyLock::new(|| Script::new(SLIDING_LOG_LUA));

/// Sliding log kept in Redis so that every instance shares one quota per key.
///
/// Each call is a single atomic script invocation (`EVALSHA`, falling back to
/// `EVAL` the first time a server sees the script).
#[derive(Debug, Clone)]
pub struct RedisBackend {
    store: SharedStore,
    key_prefix: String,
    window: Duration,
    max_requests: u32,
}

impl RedisBackend {
    pub fn new(
        store: SharedStore,
        key_prefix: impl Into<String>,
        window: Duration,
        max_requests: u32,
    ) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            window,
            max_requests: max_requests.max(1),
        }
    }

    fn store_key(&self, key: &RateLimitKey) -> String {
        format!("{}:rl:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl RateLimitBackend for RedisBackend {
    async fn limit(&self, key: &RateLimitKey) -> Result<RateLimitOutcome> {
        let mut conn = self.store.connection().await?;
        let (allowed, remaining, reset_ms): (i64, i64, i64) = SLIDING_LOG
            .key(self.store_key(key))
            .arg(self.window.as_millis() as u64)
            .arg(self.max_requests)
            .arg(Uuid::now_v7().to_string())
            .invoke_async(&mut conn)
            .await?;

        Ok(RateLimitOutcome {
            allowed: allowed == 1,
            limit: self.max_requests,
            remaining: remaining.max(0) as u32,
            reset: ResetHint::EpochMillis(reset_ms.max(0) as u64),
        })
    }

    fn window(&self) -> Duration {
        self.window
    }
}
