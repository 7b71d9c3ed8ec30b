use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use redis::AsyncCommands;

use crate::error::AppResult;

/// Sliding-window limiter tunables.
///
/// `window` constrains throughput; `cooldown` is an independent constant used
/// only to compute the user-facing wait estimate. The two are deliberately
/// separate knobs.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_calls: u32,
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(120),
        }
    }
}

/// Storage backend for per-key call timestamps.
///
/// The prune + count + insert + expire sequence must execute as one atomic
/// unit against the shared store; a read-then-write split loses updates under
/// concurrent callers.
#[async_trait::async_trait]
pub trait RateStore: Send + Sync {
    /// Atomically drops timestamps older than `now - window_secs`, counts the
    /// remainder, inserts `now`, and refreshes the key's expiry. Returns the
    /// pre-insertion count.
    async fn prune_count_insert(&self, key: &str, now: i64, window_secs: i64) -> AppResult<u32>;

    /// Oldest timestamp still recorded for `key`, if any.
    async fn oldest(&self, key: &str) -> AppResult<Option<i64>>;
}

/// Redis-backed store shared across processes.
///
/// Timestamps live in a sorted set scored by unix seconds; the four
/// sub-operations run in one MULTI/EXEC pipeline.
pub struct RedisRateStore {
    client: redis::Client,
}

impl RedisRateStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    fn redis_key(key: &str) -> String {
        format!("rate_limit:{}", key)
    }
}

#[async_trait::async_trait]
impl RateStore for RedisRateStore {
    async fn prune_count_insert(&self, key: &str, now: i64, window_secs: i64) -> AppResult<u32> {
        let redis_key = Self::redis_key(key);
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // Members carry a unique suffix so same-second calls count
        // individually instead of collapsing to one sorted-set entry.
        let member = format!("{}:{}", now, uuid::Uuid::new_v4());

        let (_, count, _, _): (u32, u32, u32, u32) = redis::pipe()
            .atomic()
            .zrembyscore(&redis_key, 0, now - window_secs)
            .zcard(&redis_key)
            .zadd(&redis_key, member, now)
            .expire(&redis_key, window_secs)
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn oldest(&self, key: &str) -> AppResult<Option<i64>> {
        let redis_key = Self::redis_key(key);
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let oldest: Vec<(String, i64)> = conn.zrange_withscores(&redis_key, 0, 0).await?;
        Ok(oldest.first().map(|(_, score)| *score))
    }
}

/// Mutex-guarded in-process store for single-node deployments and tests.
#[derive(Default)]
pub struct MemoryRateStore {
    windows: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RateStore for MemoryRateStore {
    async fn prune_count_insert(&self, key: &str, now: i64, window_secs: i64) -> AppResult<u32> {
        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(key.to_string()).or_default();

        while window.front().is_some_and(|&ts| ts <= now - window_secs) {
            window.pop_front();
        }
        let count = window.len() as u32;
        window.push_back(now);

        Ok(count)
    }

    async fn oldest(&self, key: &str) -> AppResult<Option<i64>> {
        let windows = self.windows.lock().unwrap();
        Ok(windows.get(key).and_then(|w| w.front().copied()))
    }
}

/// Per-key sliding-window rate limiter.
///
/// Note that the current timestamp is inserted even when the call is denied,
/// matching the shared-store layout other services expect: the window keeps
/// growing from the most recent call, so a caller that retries in a loop
/// extends its own block. Callers must stop issuing calls once denied.
pub struct RateWindow {
    store: Box<dyn RateStore>,
    config: RateLimitConfig,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl RateWindow {
    pub fn new(store: Box<dyn RateStore>, config: RateLimitConfig) -> Self {
        Self {
            store,
            config,
            now_fn: Box::new(|| chrono::Utc::now().timestamp()),
        }
    }

    /// Replaces the clock, for deterministic tests.
    pub fn with_clock(mut self, now_fn: Box<dyn Fn() -> i64 + Send + Sync>) -> Self {
        self.now_fn = now_fn;
        self
    }

    /// Records a call attempt and reports whether it is within budget.
    pub async fn is_allowed(&self, key: &str) -> AppResult<bool> {
        let now = (self.now_fn)();
        let count = self
            .store
            .prune_count_insert(key, now, self.config.window.as_secs() as i64)
            .await?;

        let allowed = count < self.config.max_calls;
        if !allowed {
            tracing::warn!(key = %key, in_window = count, "Rate limit exceeded");
        }
        Ok(allowed)
    }

    /// Wait estimate to display to a denied caller.
    ///
    /// Derived from the fixed cooldown constant and the oldest recorded call,
    /// not from the window length.
    pub async fn cooldown_remaining(&self, key: &str) -> AppResult<Duration> {
        let now = (self.now_fn)();
        match self.store.oldest(key).await? {
            Some(oldest) => {
                let remaining = self.config.cooldown.as_secs() as i64 - (now - oldest);
                Ok(Duration::from_secs(remaining.max(0) as u64))
            }
            None => Ok(Duration::ZERO),
        }
    }
}
