use {
    super::{RateLimitBackend, RateLimitKey, RateLimitOutcome, ResetHint},
    crate::{Result, utils::epoch_millis_now},
    async_trait::async_trait,
    dashmap::DashMap,
    std::{
        collections::VecDeque,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    },
    tokio::time::Instant,
};

/// Number of calls between sweeps of keys whose window has fully elapsed.
const SWEEP_EVERY: u64 = 1024;

/// Process-local sliding log. Each key keeps the instants of its admissions
/// within the current window.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    logs: Arc<DashMap<String, VecDeque<Instant>>>,
    calls: Arc<AtomicU64>,
    window: Duration,
    max_requests: u32,
}

impl InMemoryBackend {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            logs: Arc::new(DashMap::new()),
            calls: Arc::new(AtomicU64::new(0)),
            window,
            max_requests: max_requests.max(1),
        }
    }

    /// Drops every key whose newest admission is older than the window.
    pub fn retain_recent(&self) {
        let now = Instant::now();
        let window = self.window;
        self.logs
            .retain(|_, log| log.back().is_some_and(|at| now.duration_since(*at) < window));
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.logs.len()
    }

    fn check(&self, key: &str) -> RateLimitOutcome {
        if self.calls.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.retain_recent();
        }

        let now = Instant::now();
        let mut log = self.logs.entry(key.to_string()).or_default();
        while log
            .front()
            .is_some_and(|at| now.duration_since(*at) >= self.window)
        {
            log.pop_front();
        }

        let allowed = log.len() < self.max_requests as usize;
        if allowed {
            log.push_back(now);
        }

        let remaining = (self.max_requests as usize).saturating_sub(log.len()) as u32;
        let oldest = log.front().copied().unwrap_or(now);
        drop(log);

        let reset_in = (oldest + self.window).saturating_duration_since(now);
        RateLimitOutcome {
            allowed,
            limit: self.max_requests,
            remaining,
            reset: ResetHint::EpochMillis(epoch_millis_now() + reset_in.as_millis() as u64),
        }
    }
}

#[async_trait]
impl RateLimitBackend for InMemoryBackend {
    async fn limit(&self, key: &RateLimitKey) -> Result<RateLimitOutcome> {
        Ok(self.check(&key.to_string()))
    }

    fn window(&self) -> Duration {
        self.window
    }
}
