//! Transport errors and the out-of-band error stream payload.

use agui_core::{EventType, QueueError};
use agui_validator::SequenceError;

/// Errors returned synchronously by transport operations.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("no healthy connection available")]
    NoHealthyConnection,

    #[error("transport is draining")]
    Draining,

    #[error("transport is closed")]
    Shutdown,

    #[error("send timed out")]
    SendTimeout,

    #[error("connect timed out or was cancelled")]
    ConnectTimeout,

    #[error("frame of {size} bytes exceeds maxMessageSize {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("this transport flavour has no outbound channel")]
    SendUnsupported,

    #[error("connection `{0}` closed mid-send")]
    ConnectionClosed(String),

    #[error("event failed validation: {0}")]
    Validation(#[from] agui_core::ValidationError),

    #[error("encode: {0}")]
    Encode(String),

    #[error("backpressure: {0}")]
    Backpressure(#[from] QueueError),

    #[error("config: {0}")]
    Config(String),
}

/// Out-of-band notifications surfaced on `AgUiTransport::errors()`.
/// Low-level failures are recovered locally and reported here instead of
/// failing the calling operation.
#[derive(Debug, Clone)]
pub enum ErrorEvent {
    /// A frame could not be decoded; it was dropped.
    Decode { conn_id: String, detail: String },

    /// An inbound event violated the protocol rules.  Outside Production
    /// the event was still delivered.
    Sequence {
        event_type: EventType,
        errors: Vec<SequenceError>,
        delivered: bool,
    },

    /// A connection dropped or failed; reconnection is in progress.
    Connection { conn_id: String, detail: String },

    /// A connection exhausted its reconnect budget.
    ConnectionLost { conn_id: String },

    /// SSE resume could not continue from `Last-Event-ID`; events between
    /// the requested ID and the current tail are missing.
    ResumeGap {
        conn_id: String,
        last_event_id: String,
    },

    /// A subscription queue overflowed under its configured policy.
    Backpressure {
        subscription_id: String,
        event_type: EventType,
    },

    /// A registered handler panicked; the event loop carried on.
    HandlerPanic { handler_id: String },
}
