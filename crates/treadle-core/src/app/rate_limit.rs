//! Per-caller token bucket.
//!
//! Buckets refill continuously at `per_minute / 60` tokens per second up to
//! `burst`. Each admitted submission consumes one token. Check-and-consume
//! happens under one lock, so two submissions can never both take the last
//! token.
//!
//! The token is spent at admission, before the record is written. A
//! submission that then fails with `Unavailable` (store or broker down)
//! still costs the caller its token; nothing refunds it.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::app::config::RateLimitConfig;
use crate::domain::RateLimitError;
use crate::domain::metrics::seconds_between;
use crate::ports::Clock;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl Bucket {
    fn refill(&mut self, now: DateTime<Utc>, rate: f64, capacity: f64) {
        let elapsed = seconds_between(self.last_refill, now);
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = self.last_refill.max(now);
    }
}

/// Token buckets keyed by caller id, created full on first use.
pub struct RateLimiter<C> {
    buckets: Mutex<HashMap<String, Bucket>>,
    rate: f64,
    capacity: f64,
    clock: C,
}

impl<C: Clock> RateLimiter<C> {
    pub fn new(config: RateLimitConfig, clock: C) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rate: config.refill_per_second(),
            capacity: f64::from(config.burst),
            clock,
        }
    }

    /// Take one token from `caller_id`'s bucket, or say how long to wait.
    ///
    /// The token is not returned if the submission fails later on.
    pub async fn try_acquire(&self, caller_id: &str) -> Result<(), RateLimitError> {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(caller_id.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });
        bucket.refill(now, self.rate, self.capacity);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        Err(RateLimitError {
            caller_id: caller_id.to_string(),
            retry_after: self.retry_after(bucket.tokens),
        })
    }

    fn retry_after(&self, tokens: f64) -> Duration {
        if self.rate <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64(((1.0 - tokens) / self.rate).max(0.0))
    }

    /// Drop buckets that have refilled to capacity; they carry no state a
    /// fresh bucket would not.
    pub async fn prune_idle(&self) -> usize {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            bucket.refill(now, self.rate, self.capacity);
            bucket.tokens < self.capacity
        });
        before - buckets.len()
    }

    /// Number of buckets currently held.
    pub async fn tracked_callers(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ManualClock;
    use chrono::TimeZone;
    use rstest::rstest;
    use std::sync::Arc;

    fn limiter(per_minute: u32, burst: u32) -> (Arc<ManualClock>, RateLimiter<Arc<ManualClock>>) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let limiter = RateLimiter::new(RateLimitConfig { per_minute, burst }, clock.clone());
        (clock, limiter)
    }

    #[tokio::test]
    async fn burst_then_reject() {
        let (_, limiter) = limiter(60, 10);
        for _ in 0..10 {
            limiter.try_acquire("alice").await.unwrap();
        }

        let err = limiter.try_acquire("alice").await.unwrap_err();
        assert_eq!(err.caller_id, "alice");
        assert_eq!(err.retry_after, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn callers_do_not_share_buckets() {
        let (_, limiter) = limiter(60, 1);
        limiter.try_acquire("alice").await.unwrap();
        assert!(limiter.try_acquire("alice").await.is_err());
        limiter.try_acquire("bob").await.unwrap();
    }

    #[tokio::test]
    async fn tokens_refill_over_time() {
        let (clock, limiter) = limiter(60, 2);
        limiter.try_acquire("alice").await.unwrap();
        limiter.try_acquire("alice").await.unwrap();
        assert!(limiter.try_acquire("alice").await.is_err());

        clock.advance(Duration::from_millis(500));
        let err = limiter.try_acquire("alice").await.unwrap_err();
        assert_eq!(err.retry_after, Duration::from_millis(500));

        clock.advance(Duration::from_millis(500));
        limiter.try_acquire("alice").await.unwrap();
    }

    #[rstest]
    #[case::full_minute_burst(60, 60, 60)]
    #[case::default_burst(60, 10, 10)]
    #[case::single_token(1, 1, 1)]
    #[tokio::test]
    async fn admits_exactly_capacity_without_refill(
        #[case] per_minute: u32,
        #[case] burst: u32,
        #[case] admitted: usize,
    ) {
        let (_, limiter) = limiter(per_minute, burst);
        let mut ok = 0;
        for _ in 0..(admitted + 5) {
            if limiter.try_acquire("c").await.is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, admitted);
    }

    #[tokio::test]
    async fn prune_drops_only_full_buckets() {
        let (clock, limiter) = limiter(60, 10);
        limiter.try_acquire("idle").await.unwrap();
        clock.advance(Duration::from_secs(5));
        for _ in 0..10 {
            limiter.try_acquire("busy").await.unwrap();
        }

        assert_eq!(limiter.prune_idle().await, 1);
        assert_eq!(limiter.tracked_callers().await, 1);
    }
}
