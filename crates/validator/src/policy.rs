//! Validation policies and validator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How strictly the protocol rules are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationPolicy {
    /// Strict ordering, IDs required, timestamps required.  Events that
    /// violate sequencing are withheld from delivery.
    Production,
    /// Strict ordering; IDs and timestamps optional.
    Development,
    /// Per-event checks only; no lifecycle bookkeeping.
    Testing,
    /// Lifecycle violations are reported but always recoverable, and
    /// events are always delivered.
    Permissive,
}

impl ValidationPolicy {
    /// Whether lifecycle ordering rules run at all.
    pub fn tracks_lifecycle(self) -> bool {
        !matches!(self, ValidationPolicy::Testing)
    }

    /// Whether lifecycle violations withhold the event from delivery.
    pub fn strict_ordering(self) -> bool {
        matches!(self, ValidationPolicy::Production | ValidationPolicy::Development)
    }

    /// Whether empty protocol IDs are an error.
    pub fn ids_required(self) -> bool {
        matches!(self, ValidationPolicy::Production)
    }

    /// Whether a missing `timestampMs` is an error.
    pub fn timestamps_required(self) -> bool {
        matches!(self, ValidationPolicy::Production)
    }
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        ValidationPolicy::Production
    }
}

/// Validator tuning knobs.  All durations are in seconds on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorConfig {
    #[serde(default)]
    pub policy: ValidationPolicy,
    /// Cap on each finished-ID set (runs, messages, tools).
    #[serde(default = "d_max_finished")]
    pub max_finished_entries: usize,
    /// How long finished IDs are retained before TTL purge (seconds).
    #[serde(default = "d_retention")]
    pub retention_period: u64,
    /// Sweeper cadence (seconds).
    #[serde(default = "d_cleanup")]
    pub cleanup_interval: u64,
}

impl ValidatorConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_period)
    }

    pub fn cleanup(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            policy: ValidationPolicy::default(),
            max_finished_entries: d_max_finished(),
            retention_period: d_retention(),
            cleanup_interval: d_cleanup(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_finished() -> usize {
    10_000
}
fn d_retention() -> u64 {
    24 * 60 * 60
}
fn d_cleanup() -> u64 {
    60 * 60
}
