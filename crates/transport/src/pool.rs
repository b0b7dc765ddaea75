//! Connection pool: 1..N supervised connections to one endpoint.
//!
//! Each connection is owned by a supervisor task that connects, runs a
//! session, and reconnects with jittered exponential back-off until its
//! budget is spent or the pool shuts down.  Sends pick a healthy
//! connection (round-robin or least-loaded); inbound frames from every
//! connection funnel into a single channel consumed by the facade's
//! event loop, exactly once per frame.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;

use agui_core::BoundedQueue;

use crate::config::{SelectionStrategy, TransportConfig, TransportKind};
use crate::connection::{
    ConnStatsSnapshot, ConnectionHandle, ConnectionState, InboundFrame, OutboundFrame,
    StateChangeCallback,
};
use crate::error::{ErrorEvent, TransportError};
use crate::lifecycle::TaskRegistry;

/// Outbound queue depth per connection.
const OUTBOUND_QUEUE: usize = 64;
/// Pool-wide inbound channel depth.
const INBOUND_QUEUE: usize = 256;

pub(crate) struct ConnectionPool {
    config: Arc<TransportConfig>,
    kind: TransportKind,
    registry: Arc<TaskRegistry>,
    conns: RwLock<Vec<Arc<ConnectionHandle>>>,
    conn_seq: AtomicUsize,
    rr_cursor: AtomicUsize,
    draining: AtomicBool,
    inbound_tx: mpsc::Sender<InboundFrame>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundFrame>>>,
    errors: Arc<BoundedQueue<ErrorEvent>>,
    state_changed: Arc<Notify>,
    shutdown: CancellationToken,
    on_state_change: Option<StateChangeCallback>,
}

impl ConnectionPool {
    pub fn new(
        config: Arc<TransportConfig>,
        registry: Arc<TaskRegistry>,
        errors: Arc<BoundedQueue<ErrorEvent>>,
        on_state_change: Option<StateChangeCallback>,
    ) -> Result<Self, TransportError> {
        let kind = config.kind().map_err(TransportError::Config)?;
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        Ok(Self {
            config,
            kind,
            registry,
            conns: RwLock::new(Vec::new()),
            conn_seq: AtomicUsize::new(0),
            rr_cursor: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            errors,
            state_changed: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            on_state_change,
        })
    }

    /// Spawn the initial `min_size` connection supervisors.
    pub fn start(&self) -> Result<(), TransportError> {
        for _ in 0..self.config.pool.min_size {
            self.add_connection()?;
        }
        Ok(())
    }

    /// The single inbound channel.  Taken once, by the event loop.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<InboundFrame>> {
        self.inbound_rx.lock().take()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn add_connection(&self) -> Result<(), TransportError> {
        let seq = self.conn_seq.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_QUEUE);
        let handle = Arc::new(ConnectionHandle::new(
            format!("conn-{seq}"),
            outbound_tx,
            self.state_changed.clone(),
            self.on_state_change.clone(),
        ));
        self.conns.write().push(handle.clone());

        let config = self.config.clone();
        let kind = self.kind;
        let inbound_tx = self.inbound_tx.clone();
        let errors = self.errors.clone();
        let shutdown = self.shutdown.clone();
        self.registry
            .spawn(&format!("conn-{seq}"), async move {
                run_supervisor(kind, handle, outbound_rx, config, inbound_tx, errors, shutdown)
                    .await;
            })
            .map_err(|e| TransportError::Config(e.to_string()))?;
        Ok(())
    }

    /// Periodic health sweep: replace connections that hit their terminal
    /// `Error` state so the pool recovers to `min_size`.
    pub async fn run_health_checker(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.pool.health());
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.draining.load(Ordering::Relaxed) {
                        continue;
                    }
                    let (live, dead) = {
                        let mut conns = self.conns.write();
                        let before = conns.len();
                        conns.retain(|c| !c.state().is_terminal());
                        (conns.len(), before - conns.len())
                    };
                    if dead > 0 {
                        tracing::warn!(dead, live, "removed terminal connections from rotation");
                    }
                    for _ in live..self.config.pool.min_size {
                        if let Err(e) = self.add_connection() {
                            tracing::warn!(error = %e, "failed to replace dead connection");
                            break;
                        }
                    }
                    self.state_changed.notify_waiters();
                }
                _ = self.shutdown.cancelled() => return,
            }
        }
    }

    pub fn healthy_count(&self) -> usize {
        self.conns
            .read()
            .iter()
            .filter(|c| c.state().is_healthy())
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.conns.read().len()
    }

    /// Block until the pool has at least one healthy connection.
    pub async fn wait_healthy(
        &self,
        ctx: &CancellationToken,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.healthy_count() > 0 {
                return Ok(());
            }
            if self.shutdown.is_cancelled() {
                return Err(TransportError::Shutdown);
            }
            tokio::select! {
                _ = ctx.cancelled() => return Err(TransportError::ConnectTimeout),
                _ = self.state_changed.notified() => {}
                _ = tokio::time::sleep_until(deadline) => return Err(TransportError::ConnectTimeout),
            }
        }
    }

    /// Pick a healthy connection per the configured strategy.  Selection
    /// never returns a connection in `Reconnecting`, `Closing`, `Closed`,
    /// or `Error` state.
    fn select(&self) -> Option<Arc<ConnectionHandle>> {
        let conns = self.conns.read();
        let healthy: Vec<&Arc<ConnectionHandle>> =
            conns.iter().filter(|c| c.state().is_healthy()).collect();
        if healthy.is_empty() {
            return None;
        }
        match self.config.pool.selection {
            SelectionStrategy::RoundRobin => {
                let idx = self.rr_cursor.fetch_add(1, Ordering::Relaxed) % healthy.len();
                Some(healthy[idx].clone())
            }
            SelectionStrategy::LeastLoaded => healthy
                .into_iter()
                .min_by_key(|c| c.in_flight.load(Ordering::Relaxed))
                .cloned(),
        }
    }

    /// Send a pre-encoded frame.  Completes once the frame is handed to
    /// the OS, or fails with the pool's rejection reason.
    pub async fn send(&self, bytes: Vec<u8>, binary: bool) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Shutdown);
        }
        if self.draining.load(Ordering::Relaxed) {
            return Err(TransportError::Draining);
        }
        if bytes.len() > self.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: bytes.len(),
                max: self.config.max_message_size,
            });
        }

        let conn = match self.select() {
            Some(conn) => conn,
            None => {
                // Grow toward max_size before giving up.
                if self.connection_count() < self.config.pool.max_size {
                    let _ = self.add_connection();
                }
                return Err(TransportError::NoHealthyConnection);
            }
        };

        let _guard = InFlightGuard::new(conn.clone());
        let (ack_tx, ack_rx) = oneshot::channel();
        conn.outbound_tx
            .send_timeout(
                OutboundFrame {
                    bytes,
                    binary,
                    ack: ack_tx,
                },
                self.config.op_timeout(),
            )
            .await
            .map_err(|_| TransportError::ConnectionClosed(conn.id.clone()))?;

        match tokio::time::timeout(self.config.op_timeout(), ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ConnectionClosed(conn.id.clone())),
            Err(_) => Err(TransportError::SendTimeout),
        }
    }

    fn in_flight_total(&self) -> usize {
        self.conns
            .read()
            .iter()
            .map(|c| c.in_flight.load(Ordering::Relaxed))
            .sum()
    }

    /// Stop accepting sends, wait for in-flight sends up to the drain
    /// timeout, then force-close every connection.
    pub async fn close(&self) {
        if self.draining.swap(true, Ordering::SeqCst) {
            return; // already draining
        }
        let deadline = tokio::time::Instant::now() + self.config.pool.drain();
        while self.in_flight_total() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let abandoned = self.in_flight_total();
        if abandoned > 0 {
            tracing::warn!(abandoned, "drain timeout expired with sends in flight");
        }
        for conn in self.conns.read().iter() {
            conn.set_state(ConnectionState::Closing);
        }
        self.shutdown.cancel();
    }

    /// Per-connection stats snapshots, for aggregation by the facade.
    pub fn conn_stats(&self) -> Vec<ConnStatsSnapshot> {
        self.conns.read().iter().map(|c| c.stats.snapshot()).collect()
    }
}

/// RAII in-flight counter.
struct InFlightGuard {
    conn: Arc<ConnectionHandle>,
}

impl InFlightGuard {
    fn new(conn: Arc<ConnectionHandle>) -> Self {
        conn.in_flight.fetch_add(1, Ordering::Relaxed);
        Self { conn }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.conn.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Connect/reconnect loop for one pooled connection.
async fn run_supervisor(
    kind: TransportKind,
    handle: Arc<ConnectionHandle>,
    mut outbound_rx: mpsc::Receiver<OutboundFrame>,
    config: Arc<TransportConfig>,
    inbound_tx: mpsc::Sender<InboundFrame>,
    errors: Arc<BoundedQueue<ErrorEvent>>,
    shutdown: CancellationToken,
) {
    let http_client = reqwest::Client::new();
    let mut attempt: u32 = 0;
    let mut last_event_id: Option<String> = None;
    let mut retry_hint_ms: Option<u64> = None;

    loop {
        if shutdown.is_cancelled() {
            handle.set_state(ConnectionState::Closed);
            return;
        }
        handle.set_state(ConnectionState::Connecting);

        let session = tokio::select! {
            result = async {
                match kind {
                    TransportKind::Websocket => {
                        crate::ws::run_session(&handle, &mut outbound_rx, &config, &inbound_tx, &errors).await
                    }
                    TransportKind::Sse => {
                        crate::sse::run_session(
                            &handle,
                            &mut outbound_rx,
                            &config,
                            &inbound_tx,
                            &errors,
                            &http_client,
                            &mut last_event_id,
                            &mut retry_hint_ms,
                        )
                        .await
                    }
                }
            } => Some(result),
            _ = shutdown.cancelled() => None,
        };

        let Some(session) = session else {
            handle.set_state(ConnectionState::Closing);
            handle.set_state(ConnectionState::Closed);
            return;
        };

        // Back-off resets only once a session actually reached Connected.
        let was_connected = handle.state() == ConnectionState::Connected;
        if was_connected {
            attempt = 0;
        }

        match session {
            Ok(()) => {
                tracing::info!(conn_id = %handle.id, "connection closed");
            }
            Err(e) => {
                tracing::warn!(conn_id = %handle.id, attempt, error = %e, "connection lost");
                let _ = errors.try_push(
                    ErrorEvent::Connection {
                        conn_id: handle.id.clone(),
                        detail: e.to_string(),
                    },
                    agui_core::OverflowPolicy::DropOldest,
                );
            }
        }

        if shutdown.is_cancelled() {
            handle.set_state(ConnectionState::Closed);
            return;
        }
        if config.backoff.should_give_up(attempt) {
            tracing::error!(conn_id = %handle.id, attempts = attempt, "reconnect budget exhausted");
            let _ = errors.try_push(
                ErrorEvent::ConnectionLost {
                    conn_id: handle.id.clone(),
                },
                agui_core::OverflowPolicy::DropOldest,
            );
            handle.set_state(ConnectionState::Error);
            return;
        }

        handle.set_state(ConnectionState::Reconnecting);
        handle
            .stats
            .reconnects
            .fetch_add(1, Ordering::Relaxed);

        // A server-provided SSE retry hint overrides the computed delay.
        let delay = retry_hint_ms
            .take()
            .map(Duration::from_millis)
            .unwrap_or_else(|| config.backoff.delay_for_attempt(attempt));
        tracing::info!(
            conn_id = %handle.id,
            delay_ms = delay.as_millis() as u64,
            attempt = attempt + 1,
            "reconnecting"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => {
                handle.set_state(ConnectionState::Closed);
                return;
            }
        }
        attempt += 1;
    }
}
