//! Security gate configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    /// Reject non-TLS upgrade requests with 403.
    #[serde(default, rename = "requireTLS")]
    pub require_tls: bool,
    /// Minimum accepted TLS version, e.g. `"1.2"`.
    #[serde(default = "d_min_tls", rename = "minTLSVersion")]
    pub min_tls_version: String,
    /// Origins accepted when `strict_origin_check` is on.  Exact match,
    /// never prefix.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub strict_origin_check: bool,
    /// Gate-wide token bucket, events/sec.  0 disables.
    #[serde(default = "d_global_rate")]
    pub global_rate_limit: f64,
    /// Per-client-IP token bucket, events/sec.  0 disables.
    #[serde(default = "d_client_rate")]
    pub client_rate_limit: f64,
    /// Per-client bucket capacity (burst).
    #[serde(default = "d_burst")]
    pub client_burst_size: f64,
    /// Hard cap on concurrently active connections.
    #[serde(default = "d_max_conns")]
    pub max_connections: usize,
    /// Require a valid bearer token on every upgrade.
    #[serde(default)]
    pub require_auth: bool,
    /// Seconds after which an idle per-client bucket is swept out.
    #[serde(default = "d_limiter_ttl", rename = "limiterTTL")]
    pub limiter_ttl: u64,
}

impl SecurityConfig {
    pub fn limiter_ttl(&self) -> Duration {
        Duration::from_secs(self.limiter_ttl)
    }

    /// Parse `min_tls_version` into a comparable (major, minor) pair.
    pub fn min_tls(&self) -> (u8, u8) {
        parse_tls_version(&self.min_tls_version).unwrap_or((1, 2))
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            require_tls: false,
            min_tls_version: d_min_tls(),
            allowed_origins: Vec::new(),
            strict_origin_check: false,
            global_rate_limit: d_global_rate(),
            client_rate_limit: d_client_rate(),
            client_burst_size: d_burst(),
            max_connections: d_max_conns(),
            require_auth: false,
            limiter_ttl: d_limiter_ttl(),
        }
    }
}

/// `"1.3"` → `(1, 3)`.
pub fn parse_tls_version(version: &str) -> Option<(u8, u8)> {
    let (major, minor) = version.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

// ── serde default helpers ───────────────────────────────────────────

fn d_min_tls() -> String {
    "1.2".into()
}
fn d_global_rate() -> f64 {
    1_000.0
}
fn d_client_rate() -> f64 {
    100.0
}
fn d_burst() -> f64 {
    50.0
}
fn d_max_conns() -> usize {
    1_000
}
fn d_limiter_ttl() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SecurityConfig::default();
        assert!(!cfg.require_tls);
        assert!(!cfg.strict_origin_check);
        assert_eq!(cfg.max_connections, 1_000);
        assert_eq!(cfg.min_tls(), (1, 2));
    }

    #[test]
    fn tls_version_parsing() {
        assert_eq!(parse_tls_version("1.3"), Some((1, 3)));
        assert_eq!(parse_tls_version("garbage"), None);
    }

    #[test]
    fn deserializes_camel_case() {
        let cfg: SecurityConfig = serde_json::from_str(
            r#"{"requireTLS": true, "allowedOrigins": ["https://app.example.com"], "strictOriginCheck": true}"#,
        )
        .unwrap();
        assert!(cfg.require_tls);
        assert!(cfg.strict_origin_check);
        assert_eq!(cfg.allowed_origins.len(), 1);
    }
}
