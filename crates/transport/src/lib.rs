//! Client-side transport layer for the AG-UI protocol.
//!
//! An [`AgUiTransport`] owns a pool of WebSocket or SSE connections to a
//! single endpoint, validates the inbound event stream, and fans events
//! out to typed handlers and bounded subscription queues.  Every
//! long-lived task is registered with a lifecycle manager so shutdown can
//! prove nothing leaked.

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod pool;
pub mod sse;
pub mod stats;
pub mod subscription;
pub mod ws;

pub use backoff::ReconnectBackoff;
pub use client::{AgUiTransport, TransportBuilder};
pub use config::{PoolConfig, SelectionStrategy, TransportConfig, TransportKind};
pub use connection::{ConnStatsSnapshot, ConnectionState};
pub use error::{ErrorEvent, TransportError};
pub use handlers::{EventHandler, HandlerId};
pub use lifecycle::TaskRegistry;
pub use stats::TransportStats;
pub use subscription::{EventSubscription, HandlerSubscription};
