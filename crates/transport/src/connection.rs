//! Connection-level plumbing shared by the WebSocket and SSE flavours:
//! state machine, per-connection stats, and the frame types moving
//! between the facade, pool, and supervisor tasks.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, Notify};

use crate::error::TransportError;

/// Lifecycle of a pooled connection.
/// `Disconnected → Connecting → Connected → (Reconnecting → Connecting →
/// Connected)* → Closing → Closed`, with `Error` as a one-way sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closing,
    Closed,
    Error,
}

impl ConnectionState {
    /// Whether the pool may select this connection for a send.
    pub fn is_healthy(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Error)
    }
}

/// Observer invoked on every connection state transition.
pub type StateChangeCallback = Arc<dyn Fn(&str, ConnectionState) + Send + Sync>;

/// An outbound frame queued on a connection, acked once the frame has
/// been handed to the OS (or failed).
pub(crate) struct OutboundFrame {
    pub bytes: Vec<u8>,
    pub binary: bool,
    pub ack: oneshot::Sender<Result<(), TransportError>>,
}

/// A raw inbound frame on its way from a connection to the facade's
/// event loop.
#[derive(Debug)]
pub struct InboundFrame {
    pub conn_id: String,
    pub bytes: Vec<u8>,
    pub binary: bool,
}

/// Rolling events-per-second window.
struct RateWindow {
    window_start: Instant,
    count: u64,
    last_rate: f64,
}

impl RateWindow {
    const WINDOW_SECS: f64 = 10.0;

    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
            last_rate: 0.0,
        }
    }

    fn record(&mut self) {
        let elapsed = self.window_start.elapsed().as_secs_f64();
        if elapsed >= Self::WINDOW_SECS {
            self.last_rate = self.count as f64 / elapsed;
            self.window_start = Instant::now();
            self.count = 0;
        }
        self.count += 1;
    }

    fn rate(&self) -> f64 {
        let elapsed = self.window_start.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            self.count as f64 / elapsed
        } else {
            self.last_rate.max(self.count as f64)
        }
    }
}

/// Per-connection counters.  All hot-path fields are atomic.
pub(crate) struct ConnStats {
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub events_sent: AtomicU64,
    pub events_received: AtomicU64,
    pub frames_parsed: AtomicU64,
    pub parse_errors: AtomicU64,
    pub reconnects: AtomicU32,
    rate: Mutex<RateWindow>,
}

impl ConnStats {
    pub fn new() -> Self {
        Self {
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            events_sent: AtomicU64::new(0),
            events_received: AtomicU64::new(0),
            frames_parsed: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            reconnects: AtomicU32::new(0),
            rate: Mutex::new(RateWindow::new()),
        }
    }

    pub fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.events_received.fetch_add(1, Ordering::Relaxed);
        self.frames_parsed.fetch_add(1, Ordering::Relaxed);
        self.rate.lock().record();
    }

    pub fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.events_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnStatsSnapshot {
        ConnStatsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            frames_parsed: self.frames_parsed.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            events_per_second: self.rate.lock().rate(),
        }
    }
}

/// Point-in-time copy of one connection's counters.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnStatsSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub events_sent: u64,
    pub events_received: u64,
    pub frames_parsed: u64,
    pub parse_errors: u64,
    pub reconnects: u32,
    pub events_per_second: f64,
}

/// The pool's view of one connection: identity, observable state, stats,
/// and the outbound queue feeding the supervisor's writer.
pub(crate) struct ConnectionHandle {
    pub id: String,
    state: RwLock<ConnectionState>,
    pub stats: Arc<ConnStats>,
    /// Sends currently between selection and ack.
    pub in_flight: AtomicUsize,
    pub outbound_tx: mpsc::Sender<OutboundFrame>,
    /// Shared with the pool; pinged on every state transition so
    /// `connect` waiters can re-check.
    state_changed: Arc<Notify>,
    on_state_change: Option<StateChangeCallback>,
}

impl ConnectionHandle {
    pub fn new(
        id: String,
        outbound_tx: mpsc::Sender<OutboundFrame>,
        state_changed: Arc<Notify>,
        on_state_change: Option<StateChangeCallback>,
    ) -> Self {
        Self {
            id,
            state: RwLock::new(ConnectionState::Disconnected),
            stats: Arc::new(ConnStats::new()),
            in_flight: AtomicUsize::new(0),
            outbound_tx,
            state_changed,
            on_state_change,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn set_state(&self, next: ConnectionState) {
        {
            let mut state = self.state.write();
            if state.is_terminal() {
                return;
            }
            if *state == next {
                return;
            }
            tracing::debug!(conn_id = %self.id, from = ?*state, to = ?next, "connection state");
            *state = next;
        }
        if let Some(cb) = &self.on_state_change {
            cb(&self.id, next);
        }
        self.state_changed.notify_waiters();
    }
}
