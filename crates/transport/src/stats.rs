//! Transport-level counters, aggregated from the event loop and the
//! pool's per-connection stats.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::connection::ConnStatsSnapshot;

/// Facade-side accumulators.  Byte/event totals live on the connections;
/// this tracks what only the facade can see.
pub(crate) struct StatsRecorder {
    started_at: Instant,
    send_latency_us_sum: AtomicU64,
    sends_acked: AtomicU64,
    errors: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            send_latency_us_sum: AtomicU64::new(0),
            sends_acked: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn record_send(&self, latency_us: u64) {
        self.send_latency_us_sum
            .fetch_add(latency_us, Ordering::Relaxed);
        self.sends_acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Merge the facade counters with per-connection snapshots.
    pub fn build(&self, conns: &[ConnStatsSnapshot]) -> TransportStats {
        let sends = self.sends_acked.load(Ordering::Relaxed);
        let latency_sum = self.send_latency_us_sum.load(Ordering::Relaxed);
        TransportStats {
            events_sent: conns.iter().map(|c| c.events_sent).sum(),
            events_received: conns.iter().map(|c| c.events_received).sum(),
            bytes_sent: conns.iter().map(|c| c.bytes_sent).sum(),
            bytes_received: conns.iter().map(|c| c.bytes_received).sum(),
            average_latency_ms: if sends == 0 {
                0.0
            } else {
                latency_sum as f64 / sends as f64 / 1_000.0
            },
            error_count: self.errors.load(Ordering::Relaxed)
                + conns.iter().map(|c| c.parse_errors).sum::<u64>(),
            reconnect_count: conns.iter().map(|c| u64::from(c.reconnects)).sum(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

/// Observable transport counters.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStats {
    pub events_sent: u64,
    pub events_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub average_latency_ms: f64,
    pub error_count: u64,
    pub reconnect_count: u64,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_snapshot(sent: u64, received: u64, reconnects: u32) -> ConnStatsSnapshot {
        ConnStatsSnapshot {
            bytes_sent: sent * 10,
            bytes_received: received * 10,
            events_sent: sent,
            events_received: received,
            frames_parsed: received,
            parse_errors: 0,
            reconnects,
            events_per_second: 0.0,
        }
    }

    #[test]
    fn aggregates_across_connections() {
        let rec = StatsRecorder::new();
        rec.record_send(1_000);
        rec.record_send(3_000);
        rec.record_error();

        let stats = rec.build(&[conn_snapshot(2, 5, 1), conn_snapshot(3, 7, 2)]);
        assert_eq!(stats.events_sent, 5);
        assert_eq!(stats.events_received, 12);
        assert_eq!(stats.bytes_sent, 50);
        assert_eq!(stats.reconnect_count, 3);
        assert_eq!(stats.error_count, 1);
        assert!((stats.average_latency_ms - 2.0).abs() < 1e-9);
    }

    #[test]
    fn empty_recorder_is_zeroed() {
        let rec = StatsRecorder::new();
        let stats = rec.build(&[]);
        assert_eq!(stats.events_sent, 0);
        assert_eq!(stats.average_latency_ms, 0.0);
    }
}
