//! Per-event-type handler registry.
//!
//! Handlers are removed by the id returned at registration, never by
//! function identity.  Dispatch iterates a snapshot of the handler list,
//! so a concurrent add or remove can never invalidate an in-flight
//! dispatch; a handler removed mid-dispatch still finishes that dispatch.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::RwLock;

use agui_core::{Event, EventType};

/// Opaque handler identifier (`hnd_…`), unique within the process.
pub type HandlerId = String;

/// A callback invoked for each delivered event of a registered type.
/// Implemented for plain closures.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event);
}

impl<F> EventHandler for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn handle(&self, event: &Event) {
        self(event)
    }
}

/// Registry mapping event types to ordered handler lists.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<EventType, Vec<(HandlerId, Arc<dyn EventHandler>)>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler; returns its removal id.
    pub fn add(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = agui_core::id::new_id("hnd");
        self.handlers
            .write()
            .entry(event_type)
            .or_default()
            .push((id.clone(), handler));
        id
    }

    /// Remove a handler by id.  Returns whether anything was removed.
    pub fn remove(&self, event_type: EventType, handler_id: &str) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| id != handler_id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&event_type);
        }
        removed
    }

    /// Invoke every handler registered for the event's type, in
    /// registration order.  Panicking handlers are trapped; their ids are
    /// returned so the caller can report them.
    pub fn dispatch(&self, event: &Event) -> Vec<HandlerId> {
        let snapshot: Vec<(HandlerId, Arc<dyn EventHandler>)> = {
            let handlers = self.handlers.read();
            match handlers.get(&event.event_type()) {
                Some(list) => list.clone(),
                None => return Vec::new(),
            }
        };

        let mut panicked = Vec::new();
        for (id, handler) in snapshot {
            let result =
                std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event)));
            if result.is_err() {
                tracing::error!(handler_id = %id, "event handler panicked");
                panicked.push(id);
            }
        }
        panicked
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .get(&event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_handler(count: Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
        Arc::new(move |_: &Event| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn dispatch_hits_only_matching_type() {
        let reg = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        reg.add(EventType::RunStarted, counter_handler(count.clone()));

        reg.dispatch(&Event::run_started("t", "r"));
        reg.dispatch(&Event::step_started("plan"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removal_is_by_id_not_identity() {
        let reg = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        // Two registrations of the same closure value get distinct ids.
        let handler = counter_handler(count.clone());
        let id_a = reg.add(EventType::RunStarted, handler.clone());
        let id_b = reg.add(EventType::RunStarted, handler);
        assert_ne!(id_a, id_b);

        assert!(reg.remove(EventType::RunStarted, &id_a));
        reg.dispatch(&Event::run_started("t", "r"));
        assert_eq!(count.load(Ordering::SeqCst), 1, "only id_b remains");

        // A removed handler is never invoked again.
        assert!(!reg.remove(EventType::RunStarted, &id_a));
        assert!(reg.remove(EventType::RunStarted, &id_b));
        reg.dispatch(&Event::run_started("t", "r"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let reg = HandlerRegistry::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            reg.add(
                EventType::Custom,
                Arc::new(move |_: &Event| {
                    order.lock().push(tag);
                }),
            );
        }
        reg.dispatch(&Event::custom("x", serde_json::json!(1)));
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn panicking_handler_is_trapped_and_reported() {
        let reg = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let panic_id = reg.add(
            EventType::RunStarted,
            Arc::new(|_: &Event| panic!("intentional")),
        );
        reg.add(EventType::RunStarted, counter_handler(count.clone()));

        let panicked = reg.dispatch(&Event::run_started("t", "r"));
        assert_eq!(panicked, vec![panic_id]);
        // Later handlers still ran.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn count_tracks_registrations() {
        let reg = HandlerRegistry::new();
        assert_eq!(reg.count(EventType::Raw), 0);
        let id = reg.add(EventType::Raw, Arc::new(|_: &Event| {}));
        assert_eq!(reg.count(EventType::Raw), 1);
        reg.remove(EventType::Raw, &id);
        assert_eq!(reg.count(EventType::Raw), 0);
    }
}
