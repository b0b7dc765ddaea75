//! Bounded single-consumer queue with pluggable overflow behaviour.
//!
//! Both subscription fan-out paths (state-store change feeds and
//! transport event subscriptions) deliver through this queue.  Producers
//! choose what happens on overflow; the consumer drains asynchronously and
//! observes an explicit end-of-stream (`None`) once the queue is closed and
//! empty.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// What a producer does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Wait (bounded) for the consumer to make room.
    Block,
    /// Evict the oldest queued item to make room.
    DropOldest,
    /// Discard the incoming item.
    DropNew,
    /// Fail the push.
    Error,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropOldest
    }
}

/// Outcome of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    /// Enqueued after evicting the oldest item.
    EvictedOldest,
    /// The incoming item was discarded.
    DroppedNew,
}

/// Push failure.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full")]
    Overflow,
    #[error("queue is closed")]
    Closed,
    #[error("timed out waiting for queue capacity")]
    Timeout,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded MPSC queue.  Cheap to share behind an `Arc`.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (min 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            capacity: capacity.max(1),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Items discarded so far under `DropOldest`/`DropNew`.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Non-blocking push.  `Block` behaves like `Error` here; use
    /// [`push_timeout`](Self::push_timeout) for the waiting form.
    pub fn try_push(&self, item: T, policy: OverflowPolicy) -> Result<PushOutcome, QueueError> {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(QueueError::Closed);
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                PushOutcome::Enqueued
            } else {
                match policy {
                    OverflowPolicy::DropOldest => {
                        inner.items.pop_front();
                        inner.items.push_back(item);
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        PushOutcome::EvictedOldest
                    }
                    OverflowPolicy::DropNew => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        PushOutcome::DroppedNew
                    }
                    OverflowPolicy::Block | OverflowPolicy::Error => {
                        return Err(QueueError::Overflow)
                    }
                }
            }
        };
        if outcome != PushOutcome::DroppedNew {
            self.not_empty.notify_one();
        }
        Ok(outcome)
    }

    /// Push under the `Block` policy, waiting up to `timeout` for capacity.
    pub async fn push_timeout(&self, item: T, timeout: Duration) -> Result<(), QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return Err(QueueError::Closed);
                }
                if inner.items.len() < self.capacity {
                    inner.items.push_back(item);
                    drop(inner);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }
            match tokio::time::timeout_at(deadline, self.not_full.notified()).await {
                Ok(()) => {}
                Err(_) => return Err(QueueError::Timeout),
            }
            // Loop re-checks; another producer may have raced us to the slot.
        }
    }

    /// Await the next item.  Returns `None` once the queue is closed and
    /// drained — the end-of-stream marker.
    pub async fn pop(&self) -> Option<T> {
        loop {
            // Register the waiter before re-checking, so a close() or
            // push() landing between the check and the await still wakes
            // us.
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock();
                if let Some(item) = inner.items.pop_front() {
                    drop(inner);
                    self.not_full.notify_one();
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.inner.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Close the queue.  Queued items remain poppable; new pushes fail
    /// with [`QueueError::Closed`].
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }
}
