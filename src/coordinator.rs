use crate::bug_log::BugLog;
use crate::config::HarnessConfig;
use crate::device::Device;
use crate::error::Result;
use crate::load::{LoadGenerator, LoadSummary};
use crate::monitor::{AnomalySummary, Monitor, MonitorReport};
use crate::state::SharedState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Outcome of a run. Both are legitimate results: the race is probabilistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Reproduced,
    NotObserved,
}

impl Verdict {
    pub fn from_anomalies(anomalies: u64) -> Self {
        if anomalies > 0 {
            Verdict::Reproduced
        } else {
            Verdict::NotObserved
        }
    }

    /// Process exit status for this verdict.
    pub fn exit_code(self) -> i32 {
        match self {
            Verdict::Reproduced => 0,
            Verdict::NotObserved => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub iterations: u64,
    pub max_iterations: u64,
    pub anomalies: u64,
    pub verdict: Verdict,
    pub feed_failures: u64,
    pub first_anomaly: Option<AnomalySummary>,
    pub load: LoadSummary,
    pub bug_log_path: PathBuf,
}

/// Owns the shared state and drives one run from acquisition to release.
///
/// A coordinator is good for exactly one run: `run` consumes it, so a stop
/// flag or anomaly count can never leak into the next run.
pub struct Coordinator {
    config: HarnessConfig,
    state: Arc<SharedState>,
}

impl Coordinator {
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Arc::new(SharedState::new()),
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Handle for interrupt handlers: `request_stop()` on it ends the run
    /// gracefully. Take it before calling `run`.
    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    /// Acquire the device, load it, monitor it until the monitor finishes,
    /// then stop and join the workers and release the device.
    ///
    /// Only a failed acquisition is returned as an error, and it happens
    /// before any worker exists.
    pub async fn run<D, F>(self, acquire: F) -> Result<RunSummary>
    where
        D: Device,
        F: FnOnce() -> Result<D>,
    {
        let device = Arc::new(acquire()?);
        println!("✓ Device ready, watching {}\n", device.feed_name());

        let bug_log = Arc::new(BugLog::create(&self.config.bug_log_path, device.feed_name()).await);
        info!(path = %bug_log.path().display(), "bug log initialized");

        println!("Starting {} I/O workers...", self.config.workers);
        let load = LoadGenerator::spawn(
            Arc::clone(&device),
            Arc::clone(&self.state),
            self.config.workers,
            self.config.op_pause(),
        );
        println!("✓ I/O workers running\n");

        let monitor = Monitor::new(
            Arc::clone(&device),
            Arc::clone(&self.state),
            Arc::clone(&bug_log),
            self.config.clone(),
        );
        let report = match tokio::spawn(monitor.run()).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "monitor task failed");
                MonitorReport {
                    iterations: self.state.iterations(),
                    feed_failures: 0,
                    first_anomaly: None,
                }
            }
        };

        self.state.request_stop();
        let load = load.join().await;
        device.release();

        let anomalies = self.state.anomaly_count();
        let summary = RunSummary {
            iterations: report.iterations,
            max_iterations: self.config.max_iterations,
            anomalies,
            verdict: Verdict::from_anomalies(anomalies),
            feed_failures: report.feed_failures,
            first_anomaly: report.first_anomaly,
            load,
            bug_log_path: bug_log.path().to_path_buf(),
        };
        info!(
            iterations = summary.iterations,
            anomalies,
            commands = summary.load.commands_issued,
            verdict = ?summary.verdict,
            "run complete"
        );
        Ok(summary)
    }
}
