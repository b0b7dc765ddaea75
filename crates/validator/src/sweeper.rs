//! Background TTL sweeper for the validator's finished-ID sets.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::validator::SequenceValidator;

/// Spawn the periodic sweep task.  Runs until `shutdown` is cancelled;
/// the writer lock is held only while entries are removed.
pub fn spawn_sweeper(
    validator: Arc<SequenceValidator>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    // tokio intervals reject a zero period.
    let interval = validator
        .config()
        .cleanup()
        .max(std::time::Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a fresh validator
        // is not swept at startup.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = validator.sweep();
                    if purged > 0 {
                        tracing::debug!(purged, "swept expired finished-ID entries");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("validator sweeper stopping");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ValidatorConfig;
    use std::time::Duration;

    #[tokio::test]
    async fn sweeper_exits_on_shutdown() {
        let validator = Arc::new(SequenceValidator::new(ValidatorConfig {
            cleanup_interval: 3600,
            ..ValidatorConfig::default()
        }));
        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(validator, shutdown.clone());
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn sweeper_purges_on_tick() {
        // Zero retention: everything inserted is immediately expired.
        let validator = Arc::new(SequenceValidator::new(ValidatorConfig {
            retention_period: 0,
            cleanup_interval: 0, // tick as fast as the runtime allows
            ..ValidatorConfig::default()
        }));
        validator.validate(&agui_core::Event::run_started("thread_1", "run_1"));
        validator.validate(&agui_core::Event::run_finished("thread_1", "run_1"));
        assert!(validator.is_run_finished("run_1"));

        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(validator.clone(), shutdown.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        let _ = handle.await;

        assert!(!validator.is_run_finished("run_1"));
    }
}
