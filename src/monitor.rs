use crate::bug_log::{AnomalyEvent, BugLog};
use crate::config::HarnessConfig;
use crate::detector::AnomalyDetector;
use crate::device::Device;
use crate::error::{HarnessError, Result};
use crate::report;
use crate::state::SharedState;
use crate::status::parse_feed;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// First anomaly of a run, kept for the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub iteration: u64,
    pub elapsed_ms: i64,
    pub opcode: String,
}

impl From<&AnomalyEvent> for AnomalySummary {
    fn from(event: &AnomalyEvent) -> Self {
        Self {
            iteration: event.iteration,
            elapsed_ms: event.elapsed_ms,
            opcode: event.opcode.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    /// Completed snapshots; failed captures are not counted.
    pub iterations: u64,
    pub feed_failures: u64,
    pub first_anomaly: Option<AnomalySummary>,
}

/// Single task that snapshots the status feed and hunts for bogus timings.
///
/// Only the monitor reads the feed, so each captured snapshot is a single
/// uninterrupted read. When it finishes, for whatever reason, it sets the
/// stop flag: the monitor decides when the run is over.
pub struct Monitor<D: Device> {
    device: Arc<D>,
    state: Arc<SharedState>,
    bug_log: Arc<BugLog>,
    detector: AnomalyDetector,
    config: HarnessConfig,
}

impl<D: Device> Monitor<D> {
    pub fn new(
        device: Arc<D>,
        state: Arc<SharedState>,
        bug_log: Arc<BugLog>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            device,
            state,
            bug_log,
            detector: AnomalyDetector::new(config.anomaly_threshold_ms),
            config,
        }
    }

    pub async fn run(self) -> MonitorReport {
        let max_iterations = self.config.max_iterations;
        println!("Starting monitor (will run {} iterations)...\n", max_iterations);
        info!(max_iterations, threshold_ms = self.detector.threshold_ms(), "monitor started");

        let mut iteration: u64 = 0;
        let mut feed_failures: u64 = 0;
        let mut first_anomaly = None;

        while iteration < max_iterations && !self.state.is_stopped() {
            let feed = match self.capture().await {
                Ok(feed) => feed,
                Err(e) => {
                    feed_failures += 1;
                    warn!(iteration, error = %e, "status feed unavailable; backing off");
                    self.pause(self.config.feed_retry_backoff()).await;
                    continue;
                }
            };

            let events = scan_snapshot(iteration, Arc::from(feed), &self.detector);
            for event in &events {
                let total = self.bug_log.record(&self.state, event).await;
                info!(
                    iteration,
                    elapsed_ms = event.elapsed_ms,
                    opcode = %event.opcode,
                    total,
                    "bogus elapsed time detected"
                );
                report::print_anomaly(event, &self.config, self.bug_log.path());
                if first_anomaly.is_none() {
                    first_anomaly = Some(AnomalySummary::from(event));
                }
            }

            iteration += 1;
            self.state.set_iterations(iteration);

            if progress_due(iteration, self.config.progress_interval) {
                let anomalies = self.state.anomaly_count();
                debug!(iteration, anomalies, "monitor progress");
                report::print_progress(iteration, max_iterations, anomalies);
            }

            self.pause(self.config.iteration_pause()).await;
        }

        info!(iterations = iteration, feed_failures, "monitor finished");
        self.state.request_stop();

        MonitorReport {
            iterations: iteration,
            feed_failures,
            first_anomaly,
        }
    }

    async fn capture(&self) -> Result<String> {
        let device = Arc::clone(&self.device);
        tokio::task::spawn_blocking(move || device.read_status_feed())
            .await
            .map_err(|e| HarnessError::FeedUnavailable(format!("feed reader task failed: {}", e)))?
    }

    /// Sleep, cut short by a stop request.
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.state.stopped() => {}
        }
    }
}

/// Whether a progress line is owed after `iteration` completed snapshots.
pub fn progress_due(iteration: u64, interval: u64) -> bool {
    interval > 0 && iteration > 0 && iteration % interval == 0
}

/// One event per flagged line of `snapshot`, in feed order.
pub fn scan_snapshot(
    iteration: u64,
    snapshot: Arc<str>,
    detector: &AnomalyDetector,
) -> Vec<AnomalyEvent> {
    let detected_at = Local::now();
    parse_feed(&snapshot)
        .filter_map(|(line, record)| {
            detector.inspect(&record).map(|elapsed_ms| AnomalyEvent {
                iteration,
                elapsed_ms,
                opcode: record.opcode,
                line: line.to_string(),
                snapshot: Arc::clone(&snapshot),
                detected_at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = "max_active=3 def_reserved_size=32768\n\
         >>> device=sg0 0:0:0:0   em=0 sg_tablesize=2048\n\
           cmd: id=1 op=0x00 t_o/elap=60000/50ms\n\
           cmd: id=2 op=0x0a t_o/elap=60000/15000ms\n\
           cmd: id=3 op=0x08 t_o/elap=60000/4ms\n\
           cmd: id=4 op=0x08 t_o/elap=60000/-12ms\n\
           cmd: id=5 op=0xZZ t_o/elap=abc/ms";

    #[test]
    fn test_scan_flags_each_bad_line_in_order() {
        let events = scan_snapshot(7, Arc::from(FEED), &AnomalyDetector::new(10_000));
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].iteration, 7);
        assert_eq!(events[0].elapsed_ms, 15000);
        assert_eq!(events[0].opcode, "0a");
        assert!(events[0].line.contains("id=2"));

        assert_eq!(events[1].elapsed_ms, -12);
        assert_eq!(events[1].opcode, "08");
        assert_eq!(&*events[1].snapshot, FEED);
    }

    #[test]
    fn test_scan_clean_feed() {
        let events = scan_snapshot(0, Arc::from("op=0x00 t_o/elap=60000/50ms\n"), &AnomalyDetector::default());
        assert!(events.is_empty());
    }

    #[test]
    fn test_threshold_is_respected() {
        let events = scan_snapshot(0, Arc::from(FEED), &AnomalyDetector::new(40));
        let elapsed: Vec<i64> = events.iter().map(|e| e.elapsed_ms).collect();
        assert_eq!(elapsed, vec![50, 15000, -12]);
    }

    #[test]
    fn test_progress_cadence() {
        let reported: Vec<u64> = (1..=250).filter(|&i| progress_due(i, 100)).collect();
        assert_eq!(reported, vec![100, 200]);

        assert!(!progress_due(0, 100));
        assert!(!progress_due(5, 0));
        assert_eq!((1..=10).filter(|&i| progress_due(i, 1)).count(), 10);
    }

    #[test]
    fn test_summary_from_event() {
        let events = scan_snapshot(3, Arc::from(FEED), &AnomalyDetector::default());
        assert_eq!(
            AnomalySummary::from(&events[0]),
            AnomalySummary { iteration: 3, elapsed_ms: 15000, opcode: "0a".into() }
        );
    }
}
