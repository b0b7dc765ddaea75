//! Bounded set of recently-finished identifiers.
//!
//! Insertion order doubles as recency order: finished IDs are inserted
//! once and never touched again, so eviction pops from the front.  A TTL
//! purge drops entries older than the retention period regardless of
//! capacity pressure.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// A capacity- and TTL-bounded set of string IDs.
pub struct BoundedLruSet {
    entries: HashMap<String, Instant>,
    order: VecDeque<String>,
    capacity: usize,
}

impl BoundedLruSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record an ID as finished.  Evicts the oldest entry on overflow.
    /// Returns the evicted ID, if any.
    pub fn insert(&mut self, id: impl Into<String>) -> Option<String> {
        let id = id.into();
        if self.entries.insert(id.clone(), Instant::now()).is_some() {
            // Already present; keep the original position.
            return None;
        }
        self.order.push_back(id);

        if self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                return Some(oldest);
            }
        }
        None
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries older than `ttl`.  Returns how many were purged.
    pub fn purge_expired(&mut self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        while let Some(front) = self.order.front() {
            let expired = self
                .entries
                .get(front)
                .map(|at| now.duration_since(*at) >= ttl)
                .unwrap_or(true);
            if !expired {
                break;
            }
            let id = self.order.pop_front().unwrap_or_default();
            self.entries.remove(&id);
            purged += 1;
        }
        purged
    }
}
