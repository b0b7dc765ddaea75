//! The public transport facade.
//!
//! [`AgUiTransport`] wires the connection pool, the sequence validator,
//! the handler registry, and the subscription queues behind the
//! Connect/Send/Receive/Close surface.  A single inbound loop decodes,
//! validates, and fans out every frame the pool receives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agui_core::{BoundedQueue, Event, EventType, OverflowPolicy};
use agui_validator::{spawn_sweeper, SequenceValidator, ValidatorStats};

use crate::config::TransportConfig;
use crate::connection::{InboundFrame, StateChangeCallback};
use crate::error::{ErrorEvent, TransportError};
use crate::handlers::{EventHandler, HandlerId, HandlerRegistry};
use crate::lifecycle::TaskRegistry;
use crate::pool::ConnectionPool;
use crate::stats::{StatsRecorder, TransportStats};
use crate::subscription::{EventSubscription, HandlerSubscription};

/// Fluent builder for [`AgUiTransport`].
pub struct TransportBuilder {
    config: TransportConfig,
    on_state_change: Option<StateChangeCallback>,
}

impl TransportBuilder {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            config: TransportConfig::new(endpoint),
            on_state_change: None,
        }
    }

    pub fn with_config(config: TransportConfig) -> Self {
        Self {
            config,
            on_state_change: None,
        }
    }

    /// Mutate the configuration in place.
    pub fn configure(mut self, f: impl FnOnce(&mut TransportConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Observe connection state transitions.
    pub fn on_state_change(mut self, cb: StateChangeCallback) -> Self {
        self.on_state_change = Some(cb);
        self
    }

    pub fn build(self) -> Result<AgUiTransport, TransportError> {
        self.config.validate().map_err(TransportError::Config)?;
        let config = Arc::new(self.config);
        let registry = Arc::new(TaskRegistry::new());
        let errors_q = Arc::new(BoundedQueue::new(config.stream_queue_size));
        let receive_q = Arc::new(BoundedQueue::new(config.stream_queue_size));
        let validator = Arc::new(SequenceValidator::new(config.validator.clone()));
        let pool = Arc::new(ConnectionPool::new(
            config.clone(),
            registry.clone(),
            errors_q.clone(),
            self.on_state_change,
        )?);

        Ok(AgUiTransport {
            config,
            validator,
            pool,
            handlers: Arc::new(HandlerRegistry::new()),
            subs: Arc::new(RwLock::new(HashMap::new())),
            receive_q,
            errors_q,
            registry,
            shutdown: CancellationToken::new(),
            recorder: Arc::new(StatsRecorder::new()),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }
}

/// A bidirectional AG-UI transport over a pooled WebSocket or SSE link.
pub struct AgUiTransport {
    config: Arc<TransportConfig>,
    validator: Arc<SequenceValidator>,
    pool: Arc<ConnectionPool>,
    handlers: Arc<HandlerRegistry>,
    subs: Arc<RwLock<HashMap<String, Arc<EventSubscription>>>>,
    receive_q: Arc<BoundedQueue<Event>>,
    errors_q: Arc<BoundedQueue<ErrorEvent>>,
    registry: Arc<TaskRegistry>,
    shutdown: CancellationToken,
    recorder: Arc<StatsRecorder>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl AgUiTransport {
    pub fn builder(endpoint: impl Into<String>) -> TransportBuilder {
        TransportBuilder::new(endpoint)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Spawn the pool, event loop, health checker, and validator sweeper.
    /// Runs once; later calls are no-ops.
    fn ensure_started(&self) -> Result<(), TransportError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        self.pool.start()?;

        let inbound = self
            .pool
            .take_inbound()
            .ok_or_else(|| TransportError::Config("inbound channel already taken".into()))?;
        let ctx = LoopCtx {
            validator: self.validator.clone(),
            handlers: self.handlers.clone(),
            subs: self.subs.clone(),
            receive_q: self.receive_q.clone(),
            errors_q: self.errors_q.clone(),
            recorder: self.recorder.clone(),
        };
        let shutdown = self.shutdown.clone();
        self.registry
            .spawn("event-loop", run_event_loop(inbound, ctx, shutdown))
            .map_err(|e| TransportError::Config(e.to_string()))?;

        let pool = self.pool.clone();
        self.registry
            .spawn("pool-health", async move {
                pool.run_health_checker().await;
            })
            .map_err(|e| TransportError::Config(e.to_string()))?;

        let validator = self.validator.clone();
        let sweeper_shutdown = self.pool.shutdown_token();
        self.registry
            .spawn("validator-sweeper", async move {
                let _ = spawn_sweeper(validator, sweeper_shutdown).await;
            })
            .map_err(|e| TransportError::Config(e.to_string()))?;

        Ok(())
    }

    /// Idempotent: blocks until the pool has at least one healthy
    /// connection, or `ctx` is cancelled, or the configured timeout
    /// elapses.
    pub async fn connect(&self, ctx: &CancellationToken) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        self.ensure_started()?;
        self.pool.wait_healthy(ctx, self.config.op_timeout()).await
    }

    /// Validate, encode, and enqueue an event on a healthy connection.
    /// Completes once the frame is handed to the OS.
    pub async fn send(&self, ctx: &CancellationToken, event: &Event) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        event.validate()?;
        let bytes =
            agui_core::encode_json(event).map_err(|e| TransportError::Encode(e.to_string()))?;

        let started = Instant::now();
        let result = tokio::select! {
            r = self.pool.send(bytes, false) => r,
            _ = ctx.cancelled() => Err(TransportError::SendTimeout),
        };
        match &result {
            Ok(()) => {
                let us = started.elapsed().as_micros().min(u128::from(u64::MAX)) as u64;
                self.recorder.record_send(us);
            }
            Err(_) => self.recorder.record_error(),
        }
        result
    }

    /// The stream of validated inbound events.  Single-consumer by
    /// contract; `None` marks end-of-stream after close.
    pub fn receive(&self) -> EventStream {
        EventStream {
            queue: self.receive_q.clone(),
        }
    }

    /// Out-of-band error notifications.
    pub fn errors(&self) -> ErrorStream {
        ErrorStream {
            queue: self.errors_q.clone(),
        }
    }

    // ── Handlers ─────────────────────────────────────────────────────

    /// Register a callback for one event type; returns the id to remove
    /// it with.
    pub fn add_event_handler<F>(&self, event_type: EventType, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.handlers.add(event_type, Arc::new(handler))
    }

    /// Remove a handler by id.  Ids are the only removal key; function
    /// identity is never consulted.
    pub fn remove_event_handler(&self, event_type: EventType, handler_id: &str) -> bool {
        self.handlers.remove(event_type, handler_id)
    }

    /// Register one handler for several event types at once.  The
    /// returned subscription remembers its handler ids for
    /// [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe<F>(&self, types: &[EventType], handler: F) -> HandlerSubscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        let entries = types
            .iter()
            .map(|ty| (*ty, self.handlers.add(*ty, handler.clone())))
            .collect();
        HandlerSubscription::new(entries)
    }

    /// Remove every handler a [`subscribe`](Self::subscribe) call
    /// registered.
    pub fn unsubscribe(&self, subscription: HandlerSubscription) {
        for (ty, id) in &subscription.entries {
            self.handlers.remove(*ty, id);
        }
    }

    // ── Queue subscriptions ──────────────────────────────────────────

    /// Open a bounded queue receiving the given event types.  Overflow
    /// follows `policy` (transport default when `None`).
    pub fn subscribe_events(
        &self,
        types: &[EventType],
        queue_size: Option<usize>,
        policy: Option<OverflowPolicy>,
    ) -> Arc<EventSubscription> {
        let sub = Arc::new(EventSubscription::new(
            types,
            queue_size.unwrap_or(self.config.subscription_queue_size),
            policy.unwrap_or(self.config.overflow_policy),
            self.config.block_timeout(),
        ));
        self.subs.write().insert(sub.id.clone(), sub.clone());
        sub
    }

    /// Cancel a queue subscription; its consumer observes end-of-stream.
    pub fn unsubscribe_events(&self, id: &str) -> bool {
        match self.subs.write().remove(id) {
            Some(sub) => {
                sub.close();
                true
            }
            None => false,
        }
    }

    // ── Observability ────────────────────────────────────────────────

    pub fn stats(&self) -> TransportStats {
        self.recorder.build(&self.pool.conn_stats())
    }

    pub fn validator_stats(&self) -> ValidatorStats {
        self.validator.stats()
    }

    pub fn healthy_connections(&self) -> usize {
        self.pool.healthy_count()
    }

    /// Registered long-lived tasks that have not exited.  Zero after a
    /// completed `close`.
    pub fn active_tasks(&self) -> usize {
        self.registry.active()
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Graceful shutdown: stop the event loop, drain the pool, close
    /// every queue, and join all registered tasks.  Leaked tasks are
    /// logged and aborted.
    pub async fn close(&self, ctx: &CancellationToken) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // 1. Signal the event loop; it drains the inbound channel and
        //    closes the receive stream.
        self.shutdown.cancel();

        // 2. Drain and close the pool (bounded by drainTimeout).
        tokio::select! {
            _ = self.pool.close() => {}
            _ = ctx.cancelled() => {}
        }

        // 3. Close subscription queues so consumers observe
        //    end-of-stream.
        for sub in self.subs.write().drain().map(|(_, s)| s) {
            sub.close();
        }

        // 4. Join every registered task.
        let grace = self.config.pool.drain() + Duration::from_secs(2);
        let leaked = self.registry.shutdown(grace).await;
        if !leaked.is_empty() {
            tracing::error!(?leaked, "tasks leaked past shutdown");
        }

        self.errors_q.close();
        self.receive_q.close();
        Ok(())
    }
}

/// Consumer side of `receive()`.
pub struct EventStream {
    queue: Arc<BoundedQueue<Event>>,
}

impl EventStream {
    /// `None` is the explicit end-of-stream marker.
    pub async fn next(&mut self) -> Option<Event> {
        self.queue.pop().await
    }

    pub fn try_next(&mut self) -> Option<Event> {
        self.queue.try_pop()
    }
}

/// Consumer side of `errors()`.
pub struct ErrorStream {
    queue: Arc<BoundedQueue<ErrorEvent>>,
}

impl ErrorStream {
    pub async fn next(&mut self) -> Option<ErrorEvent> {
        self.queue.pop().await
    }

    pub fn try_next(&mut self) -> Option<ErrorEvent> {
        self.queue.try_pop()
    }
}

/// Everything the inbound loop needs.
struct LoopCtx {
    validator: Arc<SequenceValidator>,
    handlers: Arc<HandlerRegistry>,
    subs: Arc<RwLock<HashMap<String, Arc<EventSubscription>>>>,
    receive_q: Arc<BoundedQueue<Event>>,
    errors_q: Arc<BoundedQueue<ErrorEvent>>,
    recorder: Arc<StatsRecorder>,
}

/// The single inbound processing loop: decode → validate → handlers →
/// subscriptions → receive stream.
async fn run_event_loop(
    mut inbound: mpsc::Receiver<InboundFrame>,
    ctx: LoopCtx,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            frame = inbound.recv() => {
                match frame {
                    Some(frame) => process_frame(&ctx, frame).await,
                    None => break,
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }

    // Drain frames that already arrived, then signal end-of-stream.
    while let Ok(frame) = inbound.try_recv() {
        process_frame(&ctx, frame).await;
    }
    ctx.receive_q.close();
    tracing::debug!("event loop stopped");
}

async fn process_frame(ctx: &LoopCtx, frame: InboundFrame) {
    // 1. Decode.
    let decoded = if frame.binary {
        agui_core::decode_binary(&frame.bytes)
    } else {
        agui_core::decode_json(&frame.bytes)
    };
    let event = match decoded {
        Ok(event) => event,
        Err(e) => {
            ctx.recorder.record_error();
            let _ = ctx.errors_q.try_push(
                ErrorEvent::Decode {
                    conn_id: frame.conn_id,
                    detail: e.to_string(),
                },
                OverflowPolicy::DropOldest,
            );
            return;
        }
    };

    // 2. Sequence validation.  Non-fatal violations surface on the error
    //    stream; outside Production the event is still delivered.
    let outcome = ctx.validator.validate(&event);
    if !outcome.errors.is_empty() {
        ctx.recorder.record_error();
        let _ = ctx.errors_q.try_push(
            ErrorEvent::Sequence {
                event_type: event.event_type(),
                errors: outcome.errors,
                delivered: outcome.deliver,
            },
            OverflowPolicy::DropOldest,
        );
    }
    if !outcome.deliver {
        return;
    }

    // 3. Typed handlers, sequential in registration order.
    for handler_id in ctx.handlers.dispatch(&event) {
        ctx.recorder.record_error();
        let _ = ctx.errors_q.try_push(
            ErrorEvent::HandlerPanic { handler_id },
            OverflowPolicy::DropOldest,
        );
    }

    // 4. Matching queue subscriptions, each under its own policy.
    let subs: Vec<Arc<EventSubscription>> = ctx.subs.read().values().cloned().collect();
    let ty = event.event_type();
    for sub in subs.iter().filter(|s| s.matches(ty)) {
        if sub.deliver(event.clone()).await.is_err() {
            ctx.recorder.record_error();
            let _ = ctx.errors_q.try_push(
                ErrorEvent::Backpressure {
                    subscription_id: sub.id.clone(),
                    event_type: ty,
                },
                OverflowPolicy::DropOldest,
            );
        }
    }

    // 5. The receive() stream.  Bounded; oldest events yield to newest
    //    if the consumer lags.
    let _ = ctx
        .receive_q
        .try_push(event, OverflowPolicy::DropOldest);
}
