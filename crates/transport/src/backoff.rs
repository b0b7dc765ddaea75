//! Reconnect policy with jittered exponential back-off.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Controls how a pooled connection reconnects after a drop.
/// Delay for attempt `n` is `min(maxBackoff, initialBackoff · multiplierⁿ)`
/// with ±25% jitter when enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectBackoff {
    /// Delay before the first reconnect attempt, milliseconds.
    #[serde(default = "d_initial")]
    pub initial_backoff: u64,
    /// Cap on the delay between attempts, milliseconds.
    #[serde(default = "d_max")]
    pub max_backoff: u64,
    /// Multiplier applied after each failed attempt.
    #[serde(default = "d_multiplier")]
    pub backoff_multiplier: f64,
    /// Maximum consecutive failures before giving up.
    /// `0` means unlimited retries.
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    /// Spread delays by ±25% to avoid thundering herds.
    #[serde(default = "d_jitter")]
    pub jitter: bool,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_backoff: d_initial(),
            max_backoff: d_max(),
            backoff_multiplier: d_multiplier(),
            max_reconnect_attempts: 0, // unlimited
            jitter: d_jitter(),
        }
    }
}

impl ReconnectBackoff {
    /// Compute the delay for the given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_backoff as f64;
        let delay_ms = base_ms * self.backoff_multiplier.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_backoff as f64);

        let final_ms = if self.jitter {
            // ±25%, spread deterministically across attempt numbers.
            let factor = 0.75 + 0.5 * pseudo_random_fraction(attempt);
            capped_ms * factor
        } else {
            capped_ms
        };
        Duration::from_millis(final_ms as u64)
    }

    /// Whether the given attempt number exceeds the budget.
    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_reconnect_attempts > 0 && attempt >= self.max_reconnect_attempts
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_initial() -> u64 {
    250
}
fn d_max() -> u64 {
    30_000
}
fn d_multiplier() -> f64 {
    2.0
}
fn d_jitter() -> bool {
    true
}

/// Cheap deterministic "random" fraction [0, 1) based on attempt number.
/// Not cryptographically secure, just enough to spread reconnect storms.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_add(1).wrapping_mul(2654435761); // Knuth multiplicative hash
    f64::from(hash as u32) / f64::from(u32::MAX)
}
