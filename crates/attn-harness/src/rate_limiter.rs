use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded for {key}, retry after {retry_after:?}")]
    Exceeded { key: String, retry_after: Duration },
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub tokens_per_second: f64,
    pub max_burst: f64,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn per_second(n: f64) -> Self {
        Self { tokens_per_second: n, max_burst: n, window: Duration::from_secs(1) }
    }

    pub fn per_minute(n: f64) -> Self {
        Self { tokens_per_second: n / 60.0, max_burst: n, window: Duration::from_secs(60) }
    }

    pub fn per_hour(n: f64) -> Self {
        Self { tokens_per_second: n / 3600.0, max_burst: n, window: Duration::from_secs(3600) }
    }

    pub fn with_burst(mut self, max_burst: f64) -> Self {
        self.max_burst = max_burst;
        self
    }
}

/// A single token bucket. Not thread-safe on its own; callers serialize
/// access (e.g. via `DashMap`'s per-shard locking in `RateLimiter`).
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(max_burst: f64) -> Self {
        Self { tokens: max_burst, last_refill: Instant::now() }
    }

    fn refill(&mut self, tokens_per_second: f64, max_burst: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * tokens_per_second).min(max_burst);
        self.last_refill = now;
    }

    fn try_consume(&mut self, cost: f64, tokens_per_second: f64, max_burst: f64) -> Result<(), Duration> {
        self.refill(tokens_per_second, max_burst);
        if self.tokens >= cost {
            self.tokens -= cost;
            Ok(())
        } else {
            let deficit = cost - self.tokens;
            let wait_secs = if tokens_per_second > 0.0 { deficit / tokens_per_second } else { f64::MAX };
            Err(Duration::from_secs_f64(wait_secs))
        }
    }
}

/// Per-key token bucket rate limiter, used for GitHub host/resource
/// accounting and any other keyed budget.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, TokenBucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, buckets: DashMap::new() }
    }

    pub fn check(&self, key: &str) -> Result<(), RateLimitError> {
        self.check_with_cost(key, 1.0)
    }

    pub fn check_with_cost(&self, key: &str, cost: f64) -> Result<(), RateLimitError> {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.config.max_burst));
        bucket
            .try_consume(cost, self.config.tokens_per_second, self.config.max_burst)
            .map_err(|retry_after| RateLimitError::Exceeded { key: key.to_string(), retry_after })
    }

    pub fn remaining(&self, key: &str) -> f64 {
        match self.buckets.get(key) {
            Some(bucket) => bucket.tokens,
            None => self.config.max_burst,
        }
    }
}

/// Three independent rate limiters layered together: a global ceiling,
/// one bucket per user/session key, and one per endpoint/resource key.
/// All three must admit the request.
pub struct MultiKeyRateLimiter {
    global: RateLimiter,
    per_user: RateLimiter,
    per_endpoint: RateLimiter,
}

impl MultiKeyRateLimiter {
    pub fn new(global: RateLimitConfig, per_user: RateLimitConfig, per_endpoint: RateLimitConfig) -> Self {
        Self {
            global: RateLimiter::new(global),
            per_user: RateLimiter::new(per_user),
            per_endpoint: RateLimiter::new(per_endpoint),
        }
    }

    pub fn check_all(&self, user_key: &str, endpoint_key: &str) -> Result<(), RateLimitError> {
        self.check_all_with_cost(user_key, endpoint_key, 1.0)
    }

    pub fn check_all_with_cost(&self, user_key: &str, endpoint_key: &str, cost: f64) -> Result<(), RateLimitError> {
        self.global.check_with_cost("__global__", cost)?;
        self.per_user.check_with_cost(user_key, cost)?;
        self.per_endpoint.check_with_cost(endpoint_key, cost)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_admitted_then_throttled() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(1.0).with_burst(2.0));
        assert!(limiter.check("k").is_ok());
        assert!(limiter.check("k").is_ok());
        assert!(limiter.check("k").is_err());
    }

    #[test]
    fn separate_keys_have_independent_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(1.0).with_burst(1.0));
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("b").is_ok());
        assert!(limiter.check("a").is_err());
    }

    #[test]
    fn remaining_reports_full_burst_for_unseen_key() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(1.0).with_burst(5.0));
        assert_eq!(limiter.remaining("unseen"), 5.0);
    }

    #[test]
    fn multi_key_requires_all_three_layers_to_admit() {
        let limiter = MultiKeyRateLimiter::new(
            RateLimitConfig::per_second(100.0).with_burst(100.0),
            RateLimitConfig::per_second(1.0).with_burst(1.0),
            RateLimitConfig::per_second(100.0).with_burst(100.0),
        );
        assert!(limiter.check_all("user1", "ep1").is_ok());
        assert!(limiter.check_all("user1", "ep1").is_err());
        assert!(limiter.check_all("user2", "ep1").is_ok());
    }
}
