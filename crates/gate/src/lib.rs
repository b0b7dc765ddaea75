//! Inbound security gate for WebSocket upgrades.
//!
//! Applied before an upgrade is accepted, in order: TLS requirement,
//! origin allowlist, global connection cap, global and per-client token
//! buckets, and bearer-token authentication.  Every accept and reject is
//! reported to the injected audit sink.  The gate keeps no per-request
//! state beyond the rate-limit buckets and an atomic active-connection
//! counter.

pub mod audit;
pub mod auth;
pub mod axum_gate;
pub mod config;
pub mod gate;
pub mod limiter;

pub use audit::{AuditOutcome, AuditRecord, AuditSink, TracingAuditSink};
pub use auth::{AuthContext, AuthError, HmacJwtValidator, StaticTokenValidator, TokenValidator};
pub use config::SecurityConfig;
pub use gate::{GateApproval, GateRejection, SecurityGate, UpgradeRequest};
pub use limiter::TokenBucket;
