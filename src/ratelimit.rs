//! Check-in acceptance rate limiting.
//!
//! A protective gate, not a ledger: counting is fixed-window, and a backend
//! failure admits the request (fail-open) rather than stalling ingestion.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use tracing::warn;

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// `true` when `key` is over quota for the current window.
    async fn is_limited(&self, key: &str, limit: u32, window: Duration) -> bool;
}

mod scripts {
    use redis::Script;

    /// Fixed-window counter: INCR and arm the TTL on first increment in
    /// the same atomic step.
    pub fn fixed_window() -> Script {
        Script::new(
            r#"
            local count = redis.call('INCR', KEYS[1])
            if count == 1 then
                redis.call('EXPIRE', KEYS[1], ARGV[1])
            end
            return count
            "#,
        )
    }
}

pub struct RedisRateLimiter {
    redis: ConnectionManager,
}

impl RedisRateLimiter {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn is_limited(&self, key: &str, limit: u32, window: Duration) -> bool {
        let mut conn = self.redis.clone();
        let count: Result<i64, _> = scripts::fixed_window()
            .key(key)
            .arg(window.as_secs())
            .invoke_async(&mut conn)
            .await;

        match count {
            Ok(count) => count > i64::from(limit),
            Err(err) => {
                warn!(key, error = %err, "rate limiter backend unavailable; admitting");
                false
            }
        }
    }
}

/// Process-local fixed-window limiter for tests and single-node runs.
#[derive(Default)]
pub struct InMemoryRateLimiter {
    windows: Mutex<HashMap<String, (DateTime<Utc>, u32)>>,
}

impl InMemoryRateLimiter {
    /// Window bookkeeping with an explicit clock, anchored at the key's
    /// first hit.
    pub fn check_at(&self, key: &str, limit: u32, window: Duration, now: DateTime<Utc>) -> bool {
        let Ok(mut windows) = self.windows.lock() else {
            return false;
        };
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::seconds(60));

        let entry = windows
            .entry(key.to_string())
            .and_modify(|(started, count)| {
                if *started + window <= now {
                    *started = now;
                    *count = 0;
                }
                *count += 1;
            })
            .or_insert((now, 1));

        entry.1 > limit
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn is_limited(&self, key: &str, limit: u32, window: Duration) -> bool {
        self.check_at(key, limit, window, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_quota_exhaustion_in_window() {
        let limiter = InMemoryRateLimiter::default();
        let window = Duration::from_secs(60);
        let now = dt("2024-03-01T10:00:00Z");

        for i in 0..5 {
            assert!(
                !limiter.check_at("42:backup:production", 5, window, now),
                "request {i} should be admitted"
            );
        }
        assert!(limiter.check_at("42:backup:production", 5, window, now));
    }

    #[test]
    fn test_window_resets() {
        let limiter = InMemoryRateLimiter::default();
        let window = Duration::from_secs(60);
        let start = dt("2024-03-01T10:00:00Z");

        for _ in 0..6 {
            limiter.check_at("key", 5, window, start);
        }
        assert!(limiter.check_at("key", 5, window, start));

        let later = dt("2024-03-01T10:01:00Z");
        assert!(!limiter.check_at("key", 5, window, later));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = InMemoryRateLimiter::default();
        let window = Duration::from_secs(60);
        let now = dt("2024-03-01T10:00:00Z");

        for _ in 0..6 {
            limiter.check_at("org-a", 5, window, now);
        }
        assert!(limiter.check_at("org-a", 5, window, now));
        assert!(!limiter.check_at("org-b", 5, window, now));
    }
}
