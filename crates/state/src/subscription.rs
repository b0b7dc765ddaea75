//! Glob-pattern subscriptions over committed state changes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use agui_core::{BoundedQueue, JsonPatchOp, OverflowPolicy};
use parking_lot::Mutex;

/// One committed op, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub version_id: u64,
    pub op: JsonPatchOp,
}

/// Options accepted by `StateStore::subscribe`.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Queue capacity override; store default when `None`.
    pub queue_size: Option<usize>,
    /// Overflow policy override; store default when `None`.  The store
    /// never blocks its writer, so `Block` and `Error` degrade to
    /// `DropNew` here.
    pub policy: Option<OverflowPolicy>,
    /// Inactivity TTL override, seconds.
    pub ttl: Option<u64>,
}

/// A live subscription.  Single consumer; drop or cancel to release.
pub struct StateSubscription {
    pub id: String,
    pub pattern: String,
    pub(crate) segments: Vec<String>,
    pub(crate) queue: Arc<BoundedQueue<StateChange>>,
    pub(crate) policy: OverflowPolicy,
    pub(crate) ttl: Duration,
    pub(crate) created_at: Instant,
    pub(crate) last_activity: Mutex<Instant>,
}

impl StateSubscription {
    /// Await the next change.  `None` is the end-of-stream marker after
    /// cancellation.
    pub async fn recv(&self) -> Option<StateChange> {
        let change = self.queue.pop().await;
        *self.last_activity.lock() = Instant::now();
        change
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&self) -> Option<StateChange> {
        let change = self.queue.try_pop();
        if change.is_some() {
            *self.last_activity.lock() = Instant::now();
        }
        change
    }

    /// Changes discarded due to overflow.
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped_count()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether the inactivity TTL has lapsed.
    pub(crate) fn expired(&self) -> bool {
        self.last_activity.lock().elapsed() >= self.ttl
    }

    /// Deliver a change.  Never blocks; overflow follows the
    /// subscription's policy.
    pub(crate) fn offer(&self, change: StateChange) {
        // Push failures only occur for Block/Error policies, which the
        // store downgraded at subscribe time, or after close.
        let _ = self.queue.try_push(change, self.policy);
    }

    /// Whether a committed op at `path` concerns this subscription.
    /// `*` matches exactly one segment; a match on the shared prefix is
    /// enough, so both ancestor and descendant changes are delivered.
    pub(crate) fn matches(&self, path_segments: &[String]) -> bool {
        pattern_matches(&self.segments, path_segments)
    }
}

pub(crate) fn pattern_matches(pattern: &[String], path: &[String]) -> bool {
    pattern
        .iter()
        .zip(path.iter())
        .all(|(p, s)| p == "*" || p == s)
}
