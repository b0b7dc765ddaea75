//! Atomic accumulators for validator throughput and latency.

use std::sync::atomic::{AtomicU64, Ordering};

/// Histogram bucket upper bounds, in microseconds.  The last implicit
/// bucket is unbounded.
const BUCKET_BOUNDS_US: [u64; 13] = [1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000];

/// Lock-free metrics recorded on every `validate` call.
pub struct ValidatorMetrics {
    total: AtomicU64,
    passed: AtomicU64,
    failed: AtomicU64,
    latency_sum_us: AtomicU64,
    buckets: [AtomicU64; BUCKET_BOUNDS_US.len() + 1],
    finished_lookups: AtomicU64,
    finished_hits: AtomicU64,
}

impl ValidatorMetrics {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            passed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            finished_lookups: AtomicU64::new(0),
            finished_hits: AtomicU64::new(0),
        }
    }

    pub fn record(&self, latency_us: u64, clean: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if clean {
            self.passed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        let idx = BUCKET_BOUNDS_US
            .iter()
            .position(|bound| latency_us <= *bound)
            .unwrap_or(BUCKET_BOUNDS_US.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished-set membership probe and whether it hit.
    pub fn record_finished_lookup(&self, hit: bool) {
        self.finished_lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.finished_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn percentile_us(&self, counts: &[u64], total: u64, q: f64) -> u64 {
        if total == 0 {
            return 0;
        }
        let target = (total as f64 * q).ceil() as u64;
        let mut cumulative = 0;
        for (idx, count) in counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return BUCKET_BOUNDS_US.get(idx).copied().unwrap_or(u64::MAX);
            }
        }
        u64::MAX
    }

    /// Point-in-time snapshot.  Gauges come from the caller, which owns
    /// the validator state.
    pub fn snapshot(&self, active_runs: usize, finished_runs: usize) -> ValidatorStats {
        let total = self.total.load(Ordering::Relaxed);
        let passed = self.passed.load(Ordering::Relaxed);
        let counts: Vec<u64> = self
            .buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect();
        let lookups = self.finished_lookups.load(Ordering::Relaxed);
        let hits = self.finished_hits.load(Ordering::Relaxed);

        ValidatorStats {
            total_validations: total,
            success_rate: if total == 0 {
                1.0
            } else {
                passed as f64 / total as f64
            },
            avg_latency_us: if total == 0 {
                0
            } else {
                self.latency_sum_us.load(Ordering::Relaxed) / total
            },
            p95_latency_us: self.percentile_us(&counts, total, 0.95),
            p99_latency_us: self.percentile_us(&counts, total, 0.99),
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            active_runs,
            finished_runs,
        }
    }
}

impl Default for ValidatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Observable validator counters.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorStats {
    pub total_validations: u64,
    pub success_rate: f64,
    pub avg_latency_us: u64,
    pub p95_latency_us: u64,
    pub p99_latency_us: u64,
    pub cache_hit_rate: f64,
    pub active_runs: usize,
    pub finished_runs: usize,
}
