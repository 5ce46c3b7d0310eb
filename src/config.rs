use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// Load shape: enough workers to keep several commands in flight at once
const DEFAULT_WORKERS: usize = 8;
const DEFAULT_MAX_ITERATIONS: u64 = 1000;

// Anything slower than 10 s is implausible for TEST UNIT READY / READ(6) / WRITE(6)
const DEFAULT_ANOMALY_THRESHOLD_MS: i64 = 10_000;

// Pacing (microseconds unless noted)
const DEFAULT_OP_PAUSE_US: u64 = 100;
const DEFAULT_ITERATION_PAUSE_US: u64 = 100;
const DEFAULT_FEED_RETRY_BACKOFF_MS: u64 = 1000;
const DEFAULT_PROGRESS_INTERVAL: u64 = 100;

const DEFAULT_BUG_LOG_PATH: &str = "bug_find.log";
const DEFAULT_TARGET_OPCODE: &str = "0a";

/// Tunables for one harness run.
///
/// Every field has a default, so a JSON config file only needs to name the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Number of concurrent load workers.
    pub workers: usize,
    /// Feed snapshots the monitor takes before ending the run.
    pub max_iterations: u64,
    /// Elapsed values above this (or below zero) are flagged.
    pub anomaly_threshold_ms: i64,
    pub op_pause_us: u64,
    pub iteration_pause_us: u64,
    pub feed_retry_backoff_ms: u64,
    pub progress_interval: u64,
    pub bug_log_path: PathBuf,
    /// Opcode being hunted; alerts for it are highlighted.
    pub target_opcode: Option<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            anomaly_threshold_ms: DEFAULT_ANOMALY_THRESHOLD_MS,
            op_pause_us: DEFAULT_OP_PAUSE_US,
            iteration_pause_us: DEFAULT_ITERATION_PAUSE_US,
            feed_retry_backoff_ms: DEFAULT_FEED_RETRY_BACKOFF_MS,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            bug_log_path: PathBuf::from(DEFAULT_BUG_LOG_PATH),
            target_opcode: Some(DEFAULT_TARGET_OPCODE.to_string()),
        }
    }
}

impl HarnessConfig {
    /// Load a config from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
            .map_err(|e| HarnessError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| HarnessError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(HarnessError::Config("workers must be at least 1".into()));
        }
        if self.max_iterations == 0 {
            return Err(HarnessError::Config("max_iterations must be at least 1".into()));
        }
        if self.progress_interval == 0 {
            return Err(HarnessError::Config("progress_interval must be at least 1".into()));
        }
        if self.anomaly_threshold_ms < 0 {
            return Err(HarnessError::Config(format!(
                "anomaly_threshold_ms must not be negative (got {})",
                self.anomaly_threshold_ms
            )));
        }
        Ok(())
    }

    pub fn op_pause(&self) -> Duration {
        Duration::from_micros(self.op_pause_us)
    }

    pub fn iteration_pause(&self) -> Duration {
        Duration::from_micros(self.iteration_pause_us)
    }

    pub fn feed_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.feed_retry_backoff_ms)
    }

    /// Whether `opcode` is the one the operator is hunting.
    pub fn is_target_opcode(&self, opcode: &str) -> bool {
        self.target_opcode
            .as_deref()
            .is_some_and(|target| target.eq_ignore_ascii_case(opcode))
    }
}
