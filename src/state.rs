use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// State shared by the coordinator, the monitor and every load worker.
///
/// The stop flag is a cancellation token: it can only go from running to
/// stopped, and every task observes it at its loop boundary. The anomaly
/// counter only grows; the monitor bumps it while holding the bug log lock
/// so the two never disagree.
#[derive(Debug, Default)]
pub struct SharedState {
    stop: CancellationToken,
    anomalies: AtomicU64,
    iterations: AtomicU64,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; there is no way back to running.
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        self.stop.cancelled().await;
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub(crate) fn record_anomaly(&self) -> u64 {
        self.anomalies.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn anomaly_count(&self) -> u64 {
        self.anomalies.load(Ordering::SeqCst)
    }

    pub(crate) fn set_iterations(&self, iterations: u64) {
        self.iterations.store(iterations, Ordering::Relaxed);
    }

    /// Feed snapshots the monitor has completed so far.
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_stop_is_monotonic() {
        let state = SharedState::new();
        assert!(!state.is_stopped());
        state.request_stop();
        assert!(state.is_stopped());
        state.request_stop();
        assert!(state.is_stopped());
        assert!(state.stop_token().is_cancelled());
    }

    #[test]
    fn test_concurrent_anomaly_counting() {
        let state = Arc::new(SharedState::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        state.record_anomaly();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(state.anomaly_count(), 8000);
    }

    #[tokio::test]
    async fn test_stopped_wakes_waiters() {
        let state = Arc::new(SharedState::new());
        let waiter = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.stopped().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        state.request_stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
