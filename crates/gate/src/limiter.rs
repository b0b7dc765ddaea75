//! Token-bucket rate limiting.
//!
//! Buckets are lock-free: token counts and refill timestamps are atomics
//! updated with CAS loops, so the hot accept path never takes a lock.
//! The per-client map uses a read-lock fast path with get-or-create on
//! miss; idle buckets are swept out after the limiter TTL.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Micro-tokens per whole token; gives sub-token refill resolution
/// without floating-point atomics.
const MICRO: u64 = 1_000_000;

/// A lock-free token bucket.
pub struct TokenBucket {
    capacity_micro: u64,
    refill_micro_per_sec: u64,
    tokens_micro: AtomicU64,
    /// Microseconds since `created` of the last refill.
    last_refill_us: AtomicU64,
    /// Microseconds since `created` of the last acquire attempt; used by
    /// the TTL sweeper.
    last_used_us: AtomicU64,
    created: Instant,
}

impl TokenBucket {
    /// A bucket holding at most `capacity` tokens, refilled at
    /// `rate_per_sec`.  Starts full.
    pub fn new(capacity: f64, rate_per_sec: f64) -> Self {
        let capacity_micro = (capacity.max(1.0) * MICRO as f64) as u64;
        Self {
            capacity_micro,
            refill_micro_per_sec: (rate_per_sec.max(0.0) * MICRO as f64) as u64,
            tokens_micro: AtomicU64::new(capacity_micro),
            last_refill_us: AtomicU64::new(0),
            last_used_us: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    fn now_us(&self) -> u64 {
        self.created.elapsed().as_micros().min(u128::from(u64::MAX)) as u64
    }

    fn refill(&self) {
        let now = self.now_us();
        let last = self.last_refill_us.swap(now, Ordering::AcqRel);
        if now <= last {
            return;
        }
        let add = (now - last).saturating_mul(self.refill_micro_per_sec) / MICRO;
        if add == 0 {
            return;
        }
        let mut current = self.tokens_micro.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(add).min(self.capacity_micro);
            match self.tokens_micro.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Take one token.  Returns `false` on an empty bucket.
    pub fn try_acquire(&self) -> bool {
        self.refill();
        self.last_used_us.store(self.now_us(), Ordering::Relaxed);
        let mut current = self.tokens_micro.load(Ordering::Acquire);
        loop {
            if current < MICRO {
                return false;
            }
            match self.tokens_micro.compare_exchange_weak(
                current,
                current - MICRO,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Whole tokens currently available.
    pub fn available(&self) -> u64 {
        self.tokens_micro.load(Ordering::Acquire) / MICRO
    }

    fn idle_for(&self) -> Duration {
        let last = self.last_used_us.load(Ordering::Relaxed);
        Duration::from_micros(self.now_us().saturating_sub(last))
    }
}

/// Per-client buckets keyed by IP, with a read-lock fast path.
pub struct RateLimiterMap {
    buckets: RwLock<HashMap<IpAddr, Arc<TokenBucket>>>,
    capacity: f64,
    rate_per_sec: f64,
}

impl RateLimiterMap {
    pub fn new(capacity: f64, rate_per_sec: f64) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            capacity,
            rate_per_sec,
        }
    }

    /// Fetch the client's bucket, creating it on first sight.
    pub fn get_or_create(&self, client: IpAddr) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.read().get(&client) {
            return bucket.clone();
        }
        self.buckets
            .write()
            .entry(client)
            .or_insert_with(|| Arc::new(TokenBucket::new(self.capacity, self.rate_per_sec)))
            .clone()
    }

    /// Drop buckets idle longer than `ttl`.  Returns how many were
    /// removed.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.idle_for() < ttl);
        before - buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }
}
