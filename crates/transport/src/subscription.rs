//! Queue-backed event subscriptions with per-subscription backpressure.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use agui_core::{BoundedQueue, Event, EventType, OverflowPolicy, PushOutcome, QueueError};

use crate::handlers::HandlerId;

/// A bounded, single-consumer slice of the inbound event stream,
/// filtered by event type.
pub struct EventSubscription {
    pub id: String,
    types: HashSet<EventType>,
    queue: BoundedQueue<Event>,
    policy: OverflowPolicy,
    block_timeout: Duration,
}

impl EventSubscription {
    pub(crate) fn new(
        types: &[EventType],
        queue_size: usize,
        policy: OverflowPolicy,
        block_timeout: Duration,
    ) -> Self {
        Self {
            id: agui_core::id::new_id("sub"),
            types: types.iter().copied().collect(),
            queue: BoundedQueue::new(queue_size),
            policy,
            block_timeout,
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Await the next event; `None` marks end-of-stream after close.
    pub async fn recv(&self) -> Option<Event> {
        self.queue.pop().await
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.queue.try_pop()
    }

    /// Events discarded under `DropOldest`/`DropNew`.
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped_count()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn matches(&self, event_type: EventType) -> bool {
        self.types.contains(&event_type)
    }

    /// Deliver one event under this subscription's policy.  `Block` waits
    /// up to the configured bound; the other policies never wait.
    pub(crate) async fn deliver(&self, event: Event) -> Result<(), QueueError> {
        match self.policy {
            OverflowPolicy::Block => self.queue.push_timeout(event, self.block_timeout).await,
            policy => match self.queue.try_push(event, policy) {
                Ok(PushOutcome::Enqueued | PushOutcome::EvictedOldest | PushOutcome::DroppedNew) => {
                    Ok(())
                }
                Err(e) => Err(e),
            },
        }
    }

    pub(crate) fn close(&self) {
        self.queue.close();
    }
}

/// Handle returned by the multi-type handler subscription: remembers the
/// handler ids it created so unsubscribe can remove them all.
pub struct HandlerSubscription {
    pub id: String,
    pub(crate) entries: Vec<(EventType, HandlerId)>,
}

impl HandlerSubscription {
    pub(crate) fn new(entries: Vec<(EventType, HandlerId)>) -> Self {
        Self {
            id: agui_core::id::new_id("sub"),
            entries,
        }
    }

    /// The handler ids this subscription registered.
    pub fn handler_ids(&self) -> impl Iterator<Item = &HandlerId> {
        self.entries.iter().map(|(_, id)| id)
    }
}
