//! # sg Race Harness
//!
//! A concurrent fault-injection harness for the SCSI generic driver. A pool of
//! workers keeps TEST UNIT READY, READ(6) and WRITE(6) commands in flight
//! against one sg device while a monitor repeatedly snapshots the driver's
//! debug feed, looking for elapsed times that cannot be real: negative values
//! or values far beyond anything these commands take. Those values are the
//! visible symptom of a race in the driver's timing bookkeeping.
//!
//! ## Features
//!
//! - **Sustained load**: N blocking workers, each with its own open handle
//! - **Snapshot monitor**: whole-feed capture, then parse, then detect
//! - **Tolerant parsing**: half-written feed lines never fail the run
//! - **Bug log**: every anomaly is logged with the full snapshot it came from
//! - **Graceful stop**: one cancellation flag, honored by every task
//!
//! ## Quick Start
//!
//! ```no_run
//! use sgrace::{Coordinator, HarnessConfig, SimulatedDevice};
//!
//! # async fn demo() -> sgrace::Result<()> {
//! let coordinator = Coordinator::new(HarnessConfig::default())?;
//! let summary = coordinator.run(|| Ok(SimulatedDevice::default())).await?;
//! println!("{} anomalies, verdict {:?}", summary.anomalies, summary.verdict);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`status`] - feed line parser
//! - [`detector`] - anomaly predicate
//! - [`bug_log`] - append-only snapshot log
//! - [`load`] - load generator worker pool
//! - [`monitor`] - feed snapshot loop
//! - [`coordinator`] - startup, shutdown and summary
//! - [`device`] - the sg device and an in-process simulation of it

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod bug_log;
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod device;
pub mod error;
pub mod load;
pub mod monitor;
pub mod operation;
pub mod report;
pub mod state;
pub mod status;

// Re-export main public types for convenience
pub use bug_log::{AnomalyEvent, BugLog};
pub use config::HarnessConfig;
pub use coordinator::{Coordinator, RunSummary, Verdict};
pub use detector::AnomalyDetector;
pub use device::{Device, SimulatedDevice, SimulationConfig};
pub use error::{HarnessError, Result};
pub use operation::{Direction, Operation};
pub use state::SharedState;
pub use status::{parse_line, StatusRecord};
