// src/admission/bucket.rs - Continuous token buckets and the per-scope registry

use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::{RateLimit, ScopeKey};

/// Refillable capacity for one scope key.
///
/// Tokens refill continuously at `capacity / refill_interval_seconds` per second.
/// Invariant: `0 <= tokens_remaining <= capacity`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    refill_interval_seconds: f64,
    tokens_remaining: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    /// A bucket that starts full, so the first acquisition always succeeds
    pub fn full(limit: &RateLimit, now: DateTime<Utc>) -> Self {
        Self {
            capacity: limit.capacity,
            refill_interval_seconds: limit.window_seconds,
            tokens_remaining: limit.capacity as f64,
            last_refill: now,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn tokens_remaining(&self) -> f64 {
        self.tokens_remaining
    }

    pub fn last_refill(&self) -> DateTime<Utc> {
        self.last_refill
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed = match (now - self.last_refill).num_microseconds() {
            Some(micros) => micros as f64 / 1_000_000.0,
            None => f64::MAX,
        };
        // A clock that went backwards refills nothing
        if elapsed <= 0.0 {
            return;
        }

        let capacity = self.capacity as f64;
        let refilled = elapsed / self.refill_interval_seconds * capacity;
        self.tokens_remaining = (self.tokens_remaining + refilled).min(capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available
    pub fn try_take(&mut self, now: DateTime<Utc>) -> Result<(), Duration> {
        self.refill(now);

        if self.tokens_remaining >= 1.0 {
            self.tokens_remaining -= 1.0;
            Ok(())
        } else {
            let wait = (1.0 - self.tokens_remaining) * self.refill_interval_seconds / self.capacity as f64;
            Err(Duration::try_from_secs_f64(wait.max(0.0)).unwrap_or(Duration::MAX))
        }
    }

    /// Return a token taken by an invocation that was denied elsewhere
    pub fn refund(&mut self) {
        self.tokens_remaining = (self.tokens_remaining + 1.0).min(self.capacity as f64);
    }

    fn reconfigure(&mut self, limit: &RateLimit) {
        if self.capacity != limit.capacity || self.refill_interval_seconds != limit.window_seconds {
            self.capacity = limit.capacity;
            self.refill_interval_seconds = limit.window_seconds;
            self.tokens_remaining = self.tokens_remaining.min(limit.capacity as f64);
        }
    }

    /// Whether the bucket has been idle long enough to be full again and unused for `ttl`
    fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let idle = match (now - self.last_refill).to_std() {
            Ok(idle) => idle,
            Err(_) => return false,
        };
        let window = Duration::try_from_secs_f64(self.refill_interval_seconds).unwrap_or(Duration::MAX);
        idle >= ttl.max(window)
    }
}

/// Scope key -> bucket map. Each bucket sits behind its own lock so callers on
/// different keys never wait on each other once the entry exists.
#[derive(Default)]
pub struct TokenBucketRegistry {
    buckets: RwLock<HashMap<ScopeKey, Arc<Mutex<TokenBucket>>>>,
}

impl TokenBucketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn bucket(&self, key: &ScopeKey, limit: &RateLimit, now: DateTime<Utc>) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.read().await.get(key) {
            return Arc::clone(bucket);
        }

        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(key.clone()).or_insert_with(|| {
            debug!("Created token bucket for {}", key);
            Arc::new(Mutex::new(TokenBucket::full(limit, now)))
        });
        Arc::clone(bucket)
    }

    /// Take a token from the bucket for `key`, creating it full on first use
    pub async fn try_acquire(&self, key: &ScopeKey, limit: &RateLimit, now: DateTime<Utc>) -> Result<(), Duration> {
        let bucket = self.bucket(key, limit, now).await;
        let mut bucket = bucket.lock().await;
        bucket.reconfigure(limit);
        bucket.try_take(now)
    }

    pub async fn refund(&self, key: &ScopeKey) {
        let bucket = self.buckets.read().await.get(key).cloned();
        if let Some(bucket) = bucket {
            bucket.lock().await.refund();
        }
    }

    /// Evict buckets idle for at least `ttl` (and at least their own window), returning how many went
    pub async fn sweep(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        // A bucket locked or handed out right now is in use
        buckets.retain(|_, bucket| {
            if Arc::strong_count(bucket) > 1 {
                return true;
            }
            match bucket.try_lock() {
                Ok(bucket) => !bucket.is_stale(now, ttl),
                Err(_) => true,
            }
        });
        before - buckets.len()
    }

    pub async fn len(&self) -> usize {
        self.buckets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buckets.read().await.is_empty()
    }

    pub async fn snapshot(&self, key: &ScopeKey) -> Option<TokenBucket> {
        let bucket = self.buckets.read().await.get(key).cloned()?;
        let snapshot = bucket.lock().await.clone();
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::ScopeKind;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn at(seconds: f64) -> DateTime<Utc> {
        t0() + chrono::Duration::milliseconds((seconds * 1000.0) as i64)
    }

    #[test]
    fn test_bucket_conservation() {
        let limit = RateLimit::new(ScopeKind::Channel, 5, 30.0).unwrap();
        let mut bucket = TokenBucket::full(&limit, t0());

        for _ in 0..5 {
            assert!(bucket.try_take(t0()).is_ok());
        }
        assert!(bucket.try_take(t0()).is_err());

        // A full window later the bucket has refilled completely
        for _ in 0..5 {
            assert!(bucket.try_take(at(30.0)).is_ok());
        }
        assert!(bucket.try_take(at(30.0)).is_err());
    }

    #[test]
    fn test_continuous_refill_and_retry_after() {
        let limit = RateLimit::new(ScopeKind::Community, 1, 60.0).unwrap();
        let mut bucket = TokenBucket::full(&limit, t0());

        assert!(bucket.try_take(t0()).is_ok());
        let retry_after = bucket.try_take(at(10.0)).unwrap_err();
        assert!((retry_after.as_secs_f64() - 50.0).abs() < 0.01, "got {:?}", retry_after);

        // Partial refill is kept, not reset by the denied attempt
        assert!((bucket.tokens_remaining() - 10.0 / 60.0).abs() < 1e-9);
        assert!(bucket.try_take(at(61.0)).is_ok());
    }

    #[test]
    fn test_tokens_never_exceed_capacity() {
        let limit = RateLimit::new(ScopeKind::Member, 3, 10.0).unwrap();
        let mut bucket = TokenBucket::full(&limit, t0());
        assert!(bucket.try_take(at(10_000.0)).is_ok());
        assert!((bucket.tokens_remaining() - 2.0).abs() < 1e-9);

        bucket.refund();
        bucket.refund();
        assert!((bucket.tokens_remaining() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_clock_going_backwards_does_not_refill() {
        let limit = RateLimit::new(ScopeKind::Member, 1, 10.0).unwrap();
        let mut bucket = TokenBucket::full(&limit, at(100.0));
        assert!(bucket.try_take(at(100.0)).is_ok());
        assert!(bucket.try_take(at(50.0)).is_err());
        assert_eq!(bucket.last_refill(), at(100.0));
    }

    #[tokio::test]
    async fn test_registry_sweep_only_evicts_full_idle_buckets() {
        let registry = TokenBucketRegistry::new();
        let short = RateLimit::new(ScopeKind::Member, 1, 10.0).unwrap();
        let long = RateLimit::new(ScopeKind::Community, 1, 600.0).unwrap();
        let short_key = ScopeKey::new(ScopeKind::Member, 1, "ping");
        let long_key = ScopeKey::new(ScopeKind::Community, 1, "ping");

        registry.try_acquire(&short_key, &short, t0()).await.unwrap();
        registry.try_acquire(&long_key, &long, t0()).await.unwrap();
        assert_eq!(registry.len().await, 2);

        // TTL passed for both, but the long window has not refilled yet
        let evicted = registry.sweep(at(120.0), Duration::from_secs(60)).await;
        assert_eq!(evicted, 1);
        assert!(registry.snapshot(&short_key).await.is_none());
        assert!(registry.snapshot(&long_key).await.is_some());

        let evicted = registry.sweep(at(600.0), Duration::from_secs(60)).await;
        assert_eq!(evicted, 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_keeps_bucket_held_by_a_caller() {
        let registry = TokenBucketRegistry::new();
        let limit = RateLimit::new(ScopeKind::Member, 1, 10.0).unwrap();
        let key = ScopeKey::new(ScopeKind::Member, 1, "ping");

        let held = registry.bucket(&key, &limit, t0()).await;
        assert_eq!(registry.sweep(at(600.0), Duration::from_secs(60)).await, 0);

        // The caller's take lands on the bucket still in the map
        held.lock().await.try_take(at(600.0)).unwrap();
        drop(held);
        assert!(registry.try_acquire(&key, &limit, at(600.0)).await.is_err());
    }

    #[tokio::test]
    async fn test_unvalidated_huge_window_saturates() {
        let registry = TokenBucketRegistry::new();
        let limit = RateLimit { scope: ScopeKind::Community, capacity: 1, window_seconds: 1e30 };
        let key = ScopeKey::new(ScopeKind::Community, 1, "ping");

        registry.try_acquire(&key, &limit, t0()).await.unwrap();
        let retry_after = registry.try_acquire(&key, &limit, at(1.0)).await.unwrap_err();
        assert_eq!(retry_after, Duration::MAX);
        assert_eq!(registry.sweep(at(600.0), Duration::from_secs(60)).await, 0);
    }
}
