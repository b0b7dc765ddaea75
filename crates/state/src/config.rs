//! State store tuning knobs.

use agui_core::OverflowPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateConfig {
    /// Number of root shards.  Rounded up to a power of two, minimum 1.
    #[serde(default = "d_shards")]
    pub shard_count: usize,
    /// Version-log retention.
    #[serde(default = "d_history")]
    pub max_history: usize,
    /// Default per-subscription queue capacity.
    #[serde(default = "d_queue")]
    pub subscription_queue_size: usize,
    /// Default overflow policy for subscriptions that do not pick one.
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// Seconds of inactivity after which a subscription is reaped.
    #[serde(default = "d_sub_ttl", rename = "subscriptionTTL")]
    pub subscription_ttl: u64,
}

impl StateConfig {
    /// Effective shard count: the next power of two at or above the
    /// configured value.
    pub fn effective_shards(&self) -> usize {
        self.shard_count.max(1).next_power_of_two()
    }

    pub fn sub_ttl(&self) -> Duration {
        Duration::from_secs(self.subscription_ttl)
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            shard_count: d_shards(),
            max_history: d_history(),
            subscription_queue_size: d_queue(),
            overflow_policy: OverflowPolicy::default(),
            subscription_ttl: d_sub_ttl(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_shards() -> usize {
    16
}
fn d_history() -> usize {
    500
}
fn d_queue() -> usize {
    64
}
fn d_sub_ttl() -> u64 {
    60 * 60
}
