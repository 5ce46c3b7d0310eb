//! Append-only log of anomaly snapshots.
//!
//! Each detected anomaly becomes one self-contained text block holding the
//! detection time, iteration, elapsed value, opcode and the complete feed
//! snapshot it was found in, so a report can be filed without rerunning.

use crate::error::Result;
use crate::state::SharedState;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

const HEAVY_RULE: &str =
    "================================================================================";
const LIGHT_RULE: &str =
    "--------------------------------------------------------------------------------";
const RECORD_TITLE: &str = "ANOMALY DETECTED at ";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One flagged feed line together with the snapshot it came from.
#[derive(Debug, Clone)]
pub struct AnomalyEvent {
    pub iteration: u64,
    pub elapsed_ms: i64,
    pub opcode: String,
    /// The offending line as captured.
    pub line: String,
    /// Whole feed at detection time, shared by all events of one iteration.
    pub snapshot: Arc<str>,
    pub detected_at: DateTime<Local>,
}

#[derive(Debug)]
pub struct BugLog {
    path: PathBuf,
    feed_name: String,
    writer: Mutex<()>,
}

impl BugLog {
    /// Truncate `path` and write the log header. A log that cannot be created
    /// is reported and the run goes on; later appends will retry the file.
    pub async fn create(path: impl Into<PathBuf>, feed_name: &str) -> Self {
        let log = Self {
            path: path.into(),
            feed_name: feed_name.to_string(),
            writer: Mutex::new(()),
        };

        let header = format!(
            "Bug Detection Log\nStarted at: {}\nLog file will contain complete {} snapshots when anomalies are detected\n\n",
            Local::now().format(TIME_FORMAT),
            log.feed_name,
        );
        if let Err(e) = tokio::fs::write(&log.path, header).await {
            warn!(path = %log.path.display(), error = %e, "could not create bug log");
        }
        log
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `event` and count it in `state` as one step, so the counter
    /// always equals the number of events handed to the log. Writers are
    /// serialized so blocks never interleave. A failed write is logged and
    /// still counted.
    pub async fn record(&self, state: &SharedState, event: &AnomalyEvent) -> u64 {
        let _guard = self.writer.lock().await;
        if let Err(e) = self.write_block(event).await {
            warn!(
                path = %self.path.display(),
                iteration = event.iteration,
                error = %e,
                "failed to write anomaly to bug log"
            );
        }
        state.record_anomaly()
    }

    async fn write_block(&self, event: &AnomalyEvent) -> Result<()> {
        let block = format_record(event, &self.feed_name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(block.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Render the text block for one event.
pub fn format_record(event: &AnomalyEvent, feed_name: &str) -> String {
    let mut block = String::with_capacity(event.snapshot.len() + 1024);
    block.push('\n');
    block.push_str(HEAVY_RULE);
    block.push('\n');
    block.push_str(RECORD_TITLE);
    block.push_str(&event.detected_at.format(TIME_FORMAT).to_string());
    block.push('\n');
    block.push_str(HEAVY_RULE);
    block.push('\n');
    block.push_str(&format!("Iteration:     {}\n", event.iteration));
    block.push_str(&format!("Elapsed time:  {} ms\n", event.elapsed_ms));
    block.push_str(&format!("Opcode:        0x{}\n", event.opcode));
    block.push_str(&format!("Debug line:    {}\n", event.line.trim()));
    block.push_str(LIGHT_RULE);
    block.push('\n');
    block.push_str(&format!("Complete {} snapshot:\n", feed_name));
    block.push_str(LIGHT_RULE);
    block.push('\n');
    block.push_str(&event.snapshot);
    if !event.snapshot.ends_with('\n') {
        block.push('\n');
    }
    block.push_str(HEAVY_RULE);
    block.push_str("\n\n");
    block
}

/// Number of event blocks in a bug log's text.
///
/// A block opens with a heavy rule, the title line and another heavy rule.
/// Title-like lines inside a captured snapshot do not match that frame.
pub fn count_records(log_text: &str) -> usize {
    let lines: Vec<&str> = log_text.lines().collect();
    lines
        .windows(3)
        .filter(|frame| {
            frame[0] == HEAVY_RULE && frame[1].starts_with(RECORD_TITLE) && frame[2] == HEAVY_RULE
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(iteration: u64) -> AnomalyEvent {
        AnomalyEvent {
            iteration,
            elapsed_ms: -4294967,
            opcode: "0a".into(),
            line: "  op=0x0a t_o/elap=60000/-4294967ms".into(),
            snapshot: Arc::from("dev_max_active=8\n  op=0x0a t_o/elap=60000/-4294967ms"),
            detected_at: Local::now(),
        }
    }

    #[test]
    fn test_record_block_layout() {
        let block = format_record(&sample_event(42), "/proc/scsi/sg/debug");
        assert!(block.contains("Iteration:     42\n"));
        assert!(block.contains("Elapsed time:  -4294967 ms\n"));
        assert!(block.contains("Opcode:        0x0a\n"));
        assert!(block.contains("Complete /proc/scsi/sg/debug snapshot:\n"));
        assert!(block.contains("dev_max_active=8\n  op=0x0a t_o/elap=60000/-4294967ms\n"));
        assert!(block.ends_with(&format!("{}\n\n", HEAVY_RULE)));
        assert_eq!(count_records(&block), 1);
    }

    #[tokio::test]
    async fn test_header_only_after_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bug_find.log");
        let log = BugLog::create(&path, "feed").await;
        assert_eq!(log.path(), path.as_path());

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Bug Detection Log\n"));
        assert_eq!(count_records(&text), 0);
    }

    #[tokio::test]
    async fn test_concurrent_records_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bug_find.log");
        let log = Arc::new(BugLog::create(&path, "feed").await);
        let state = Arc::new(SharedState::new());

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let log = Arc::clone(&log);
                let state = Arc::clone(&state);
                tokio::spawn(async move { log.record(&state, &sample_event(i)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(count_records(&text), 16);
        assert_eq!(state.anomaly_count(), 16);
        for block in text.split(RECORD_TITLE).skip(1) {
            assert_eq!(block.matches("Iteration:").count(), 1);
        }
    }

    #[tokio::test]
    async fn test_unwritable_log_is_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("bug_find.log");
        let log = BugLog::create(&path, "feed").await;
        let state = SharedState::new();

        assert_eq!(log.record(&state, &sample_event(1)).await, 1);
        assert_eq!(log.record(&state, &sample_event(2)).await, 2);
        assert_eq!(state.anomaly_count(), 2);
        assert!(!path.exists());
    }

    #[test]
    fn test_snapshot_text_does_not_inflate_count() {
        let mut event = sample_event(5);
        event.snapshot = Arc::from(
            "ANOMALY DETECTED at 2024-01-01 00:00:00\n\
             ANOMALY DETECTED at somewhere else\n  op=0x0a t_o/elap=60000/-4294967ms\n",
        );
        let mut text = String::from("Bug Detection Log\n");
        text.push_str(&format_record(&event, "feed"));
        text.push_str(&format_record(&sample_event(6), "feed"));
        assert_eq!(count_records(&text), 2);
    }
}
