use crate::device::Device;
use crate::operation::Operation;
use crate::state::SharedState;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

/// Counters updated by every worker.
#[derive(Debug, Default)]
pub struct LoadStats {
    issued: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

impl LoadStats {
    pub fn commands_issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    pub fn command_failures(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Workers that never got a channel.
    pub fn workers_abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub workers: usize,
    pub workers_abandoned: u64,
    pub commands_issued: u64,
    pub command_failures: u64,
}

/// Pool of workers hammering one device until the stop flag is set.
///
/// Commands block in the kernel, so each worker gets a dedicated OS thread.
/// They stay off the runtime's blocking pool, which the monitor needs for
/// feed captures no matter how many workers are running.
pub struct LoadGenerator {
    workers: Vec<oneshot::Receiver<()>>,
    stats: Arc<LoadStats>,
}

impl LoadGenerator {
    pub fn spawn<D: Device>(
        device: Arc<D>,
        state: Arc<SharedState>,
        workers: usize,
        pause: Duration,
    ) -> Self {
        let stats = Arc::new(LoadStats::default());
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let device = Arc::clone(&device);
            let state = Arc::clone(&state);
            let worker_stats = Arc::clone(&stats);
            let (done_tx, done_rx) = oneshot::channel();
            let spawned = thread::Builder::new()
                .name(format!("sg-load-{}", id))
                .spawn(move || {
                    run_worker(id, &*device, &state, pause, &worker_stats);
                    // The receiver only goes away if the generator was dropped.
                    let _ = done_tx.send(());
                });
            match spawned {
                Ok(_) => handles.push(done_rx),
                Err(e) => {
                    error!(worker = id, error = %e, "could not start load worker thread");
                    stats.abandoned.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Self {
            workers: handles,
            stats,
        }
    }

    /// Workers whose thread started.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every worker. Callers set the stop flag first.
    pub async fn join(self) -> LoadSummary {
        let workers = self.workers.len();
        for (id, done) in self.workers.into_iter().enumerate() {
            // A worker that panicked drops its sender without sending.
            if done.await.is_err() {
                warn!(worker = id, "load worker did not exit cleanly");
            }
        }
        LoadSummary {
            workers,
            workers_abandoned: self.stats.workers_abandoned(),
            commands_issued: self.stats.commands_issued(),
            command_failures: self.stats.command_failures(),
        }
    }
}

fn run_worker<D: Device>(
    id: usize,
    device: &D,
    state: &SharedState,
    pause: Duration,
    stats: &LoadStats,
) {
    let mut channel = match device.open_channel() {
        Ok(channel) => channel,
        Err(e) => {
            error!(worker = id, error = %e, "could not open device; worker exiting");
            stats.abandoned.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };
    debug!(worker = id, "load worker started");

    for op in Operation::rotation() {
        if state.is_stopped() {
            break;
        }
        stats.issued.fetch_add(1, Ordering::Relaxed);
        // Command outcome is irrelevant; only the timing pressure matters.
        if let Err(e) = device.submit(&mut channel, op) {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            trace!(worker = id, error = %e, "command failed");
        }
        std::thread::sleep(pause);
    }

    drop(channel);
    debug!(worker = id, "load worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{SimulatedDevice, SimulationConfig};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_workers_run_until_stopped() {
        let device = Arc::new(SimulatedDevice::default());
        let state = Arc::new(SharedState::new());
        let load = LoadGenerator::spawn(Arc::clone(&device), Arc::clone(&state), 4, Duration::from_micros(100));
        assert_eq!(load.worker_count(), 4);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(device.submitted() > 0);

        state.request_stop();
        let summary = load.join().await;
        assert_eq!(summary.workers, 4);
        assert_eq!(summary.workers_abandoned, 0);
        assert_eq!(summary.command_failures, 0);
        assert_eq!(summary.commands_issued, device.submitted());
        assert_eq!(device.open_channels(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_channel_failure_ends_only_that_worker() {
        let device = Arc::new(SimulatedDevice::new(SimulationConfig {
            refuse_channels: true,
            ..SimulationConfig::default()
        }));
        let state = Arc::new(SharedState::new());
        let load = LoadGenerator::spawn(device, Arc::clone(&state), 3, Duration::ZERO);

        let summary = load.join().await;
        assert_eq!(summary.workers_abandoned, 3);
        assert_eq!(summary.commands_issued, 0);
        assert!(!state.is_stopped());
    }
}
