//! Transport configuration.
//!
//! Plain serde-deserializable structs with defaults; the library reads no
//! environment variables — hosts surface these from their own config
//! sources.

use std::collections::HashMap;
use std::time::Duration;

use agui_core::OverflowPolicy;
use agui_validator::ValidatorConfig;
use serde::{Deserialize, Serialize};

/// Which wire flavour a transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Websocket,
    Sse,
}

/// How the pool picks a connection for an outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    RoundRobin,
    LeastLoaded,
}

impl Default for SelectionStrategy {
    fn default() -> Self {
        SelectionStrategy::RoundRobin
    }
}

/// Connection-pool sizing and drain behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    #[serde(default = "d_min_size")]
    pub min_size: usize,
    #[serde(default = "d_max_size")]
    pub max_size: usize,
    #[serde(default)]
    pub selection: SelectionStrategy,
    /// Seconds to wait for in-flight sends on close.
    #[serde(default = "d_drain")]
    pub drain_timeout: u64,
    /// Seconds between health-check sweeps.
    #[serde(default = "d_health")]
    pub health_interval: u64,
}

impl PoolConfig {
    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_timeout)
    }

    pub fn health(&self) -> Duration {
        Duration::from_secs(self.health_interval)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: d_min_size(),
            max_size: d_max_size(),
            selection: SelectionStrategy::default(),
            drain_timeout: d_drain(),
            health_interval: d_health(),
        }
    }
}

/// Full transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// `ws://`/`wss://` for WebSocket, `http://`/`https://` for SSE.
    pub endpoint: String,
    /// Extra headers sent on connect / upgrade.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Operation timeout, seconds (connect, send ack).
    #[serde(default = "d_timeout")]
    pub timeout: u64,
    /// Refuse plaintext endpoints when set.
    #[serde(default)]
    pub secure: bool,
    /// Upper bound on a single frame, bytes.  Frames exactly at the limit
    /// are accepted.
    #[serde(default = "d_max_message")]
    pub max_message_size: usize,
    /// Seconds without read activity before a keepalive ping.
    #[serde(default = "d_idle")]
    pub idle_timeout: u64,
    /// Optional HTTP endpoint for outbound sends on an SSE transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_endpoint: Option<String>,

    #[serde(default)]
    pub backoff: crate::backoff::ReconnectBackoff,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,

    /// Capacity of the `receive()` and `errors()` queues.
    #[serde(default = "d_stream_queue")]
    pub stream_queue_size: usize,
    /// Default capacity for event subscriptions.
    #[serde(default = "d_sub_queue")]
    pub subscription_queue_size: usize,
    /// Default overflow policy for event subscriptions.
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// Bound on a `Block`-policy subscription push, milliseconds.
    #[serde(default = "d_block_timeout")]
    pub block_timeout_ms: u64,
}

impl TransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: HashMap::new(),
            timeout: d_timeout(),
            secure: false,
            max_message_size: d_max_message(),
            idle_timeout: d_idle(),
            post_endpoint: None,
            backoff: crate::backoff::ReconnectBackoff::default(),
            pool: PoolConfig::default(),
            validator: ValidatorConfig::default(),
            stream_queue_size: d_stream_queue(),
            subscription_queue_size: d_sub_queue(),
            overflow_policy: OverflowPolicy::default(),
            block_timeout_ms: d_block_timeout(),
        }
    }

    /// Infer the wire flavour from the endpoint scheme.
    pub fn kind(&self) -> Result<TransportKind, String> {
        let scheme = self.endpoint.split("://").next().unwrap_or_default();
        match scheme {
            "ws" | "wss" => Ok(TransportKind::Websocket),
            "http" | "https" => Ok(TransportKind::Sse),
            other => Err(format!("unsupported endpoint scheme `{other}`")),
        }
    }

    /// Whether the endpoint uses a TLS scheme.
    pub fn is_tls(&self) -> bool {
        self.endpoint.starts_with("wss://") || self.endpoint.starts_with("https://")
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<(), String> {
        self.kind()?;
        if self.secure && !self.is_tls() {
            return Err("secure=true requires a wss:// or https:// endpoint".into());
        }
        if self.pool.min_size == 0 {
            return Err("pool.minSize must be at least 1".into());
        }
        if self.pool.max_size < self.pool.min_size {
            return Err("pool.maxSize must be >= pool.minSize".into());
        }
        Ok(())
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_timeout() -> u64 {
    30
}
fn d_max_message() -> usize {
    1024 * 1024 // 1 MiB
}
fn d_idle() -> u64 {
    30
}
fn d_min_size() -> usize {
    1
}
fn d_max_size() -> usize {
    4
}
fn d_drain() -> u64 {
    10
}
fn d_health() -> u64 {
    15
}
fn d_stream_queue() -> usize {
    256
}
fn d_sub_queue() -> usize {
    64
}
fn d_block_timeout() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_scheme() {
        assert_eq!(
            TransportConfig::new("ws://host/ws").kind().unwrap(),
            TransportKind::Websocket
        );
        assert_eq!(
            TransportConfig::new("https://host/events").kind().unwrap(),
            TransportKind::Sse
        );
        assert!(TransportConfig::new("ftp://host").kind().is_err());
    }

    #[test]
    fn secure_requires_tls_scheme() {
        let mut cfg = TransportConfig::new("ws://host/ws");
        cfg.secure = true;
        assert!(cfg.validate().is_err());
        cfg.endpoint = "wss://host/ws".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn pool_sizing_validated() {
        let mut cfg = TransportConfig::new("ws://host/ws");
        cfg.pool.min_size = 0;
        assert!(cfg.validate().is_err());
        cfg.pool.min_size = 8;
        cfg.pool.max_size = 2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn defaults() {
        let cfg = TransportConfig::new("ws://host/ws");
        assert_eq!(cfg.max_message_size, 1024 * 1024);
        assert_eq!(cfg.pool.min_size, 1);
        assert_eq!(cfg.pool.max_size, 4);
        assert_eq!(cfg.pool.selection, SelectionStrategy::RoundRobin);
        assert_eq!(cfg.overflow_policy, OverflowPolicy::DropOldest);
    }

    #[test]
    fn deserializes_from_toml_fragment() {
        let cfg: TransportConfig = toml::from_str(
            r#"
            endpoint = "wss://agent.example.com/v1/events"
            secure = true
            maxMessageSize = 65536

            [backoff]
            initialBackoff = 100
            maxBackoff = 5000

            [pool]
            minSize = 2
            maxSize = 8
            selection = "least-loaded"
            "#,
        )
        .unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_message_size, 65536);
        assert_eq!(cfg.pool.selection, SelectionStrategy::LeastLoaded);
        assert_eq!(cfg.backoff.initial_backoff, 100);
    }
}
