//! In-process stand-in for an sg device.
//!
//! Renders a feed in the same shape as `/proc/scsi/sg/debug` from the
//! commands currently in flight. A bogus elapsed value can be planted on a
//! fixed cadence, which makes whole harness runs reproducible without
//! kernel support.

use super::Device;
use crate::error::{HarnessError, Result};
use crate::operation::Operation;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

const FEED_NAME: &str = "simulated sg debug feed";
const COMMAND_TIMEOUT_MS: u64 = 60_000;
/// Value a torn completion timestamp typically decodes to.
pub const BOGUS_ELAPSED_MS: i64 = -4_294_967;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    /// How long each submitted command stays in flight.
    pub command_latency: Duration,
    /// Plant one bogus WRITE(6) line in every Nth successful feed read.
    pub bogus_every: Option<u64>,
    /// Fail every Nth feed read attempt.
    pub feed_failure_every: Option<u64>,
    /// Refuse every `open_channel` call.
    pub refuse_channels: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            command_latency: Duration::from_millis(1),
            bogus_every: None,
            feed_failure_every: None,
            refuse_channels: false,
        }
    }
}

#[derive(Debug)]
struct InFlight {
    op: Operation,
    channel: u64,
    started: Instant,
}

#[derive(Debug)]
pub struct SimulatedDevice {
    config: SimulationConfig,
    in_flight: Mutex<BTreeMap<u64, InFlight>>,
    next_command: AtomicU64,
    next_channel: AtomicU64,
    submitted: AtomicU64,
    feed_attempts: AtomicU64,
    feed_reads: AtomicU64,
    open_channels: Arc<AtomicUsize>,
    released: AtomicBool,
}

/// Channel handed to one worker; closing it is dropping it.
#[derive(Debug)]
pub struct SimChannel {
    id: u64,
    open_channels: Arc<AtomicUsize>,
}

impl Drop for SimChannel {
    fn drop(&mut self) {
        self.open_channels.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SimulatedDevice {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            in_flight: Mutex::new(BTreeMap::new()),
            next_command: AtomicU64::new(1),
            next_channel: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            feed_attempts: AtomicU64::new(0),
            feed_reads: AtomicU64::new(0),
            open_channels: Arc::new(AtomicUsize::new(0)),
            released: AtomicBool::new(false),
        }
    }

    /// Commands completed so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Successful feed reads so far.
    pub fn feed_reads(&self) -> u64 {
        self.feed_reads.load(Ordering::SeqCst)
    }

    pub fn open_channels(&self) -> usize {
        self.open_channels.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn render_feed(&self, read_number: u64) -> String {
        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

        let mut feed = String::new();
        let _ = writeln!(feed, "max_active={} def_reserved_size=32768", in_flight.len());
        let _ = writeln!(
            feed,
            " >>> device=sim0 0:0:0:0   em=0 sg_tablesize=2048 excl=0 open_cnt={}",
            self.open_channels()
        );
        for (id, command) in in_flight.iter() {
            let _ = writeln!(
                feed,
                "   fd=#{} cmd: id={} op=0x{:02x} t_o/elap={}/{}ms sgat=0 dur=0",
                command.channel,
                id,
                command.op.opcode(),
                COMMAND_TIMEOUT_MS,
                command.started.elapsed().as_millis(),
            );
        }

        if is_nth(read_number, self.config.bogus_every) {
            let _ = writeln!(
                feed,
                "   fd=#0 cmd: id=0 op=0x{:02x} t_o/elap={}/{}ms sgat=0 dur=0",
                Operation::WriteOp.opcode(),
                COMMAND_TIMEOUT_MS,
                BOGUS_ELAPSED_MS,
            );
        }
        feed
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

fn is_nth(count: u64, every: Option<u64>) -> bool {
    matches!(every, Some(n) if n > 0 && count % n == 0)
}

impl Device for SimulatedDevice {
    type Channel = SimChannel;

    fn feed_name(&self) -> &str {
        FEED_NAME
    }

    fn open_channel(&self) -> Result<SimChannel> {
        if self.config.refuse_channels {
            return Err(HarnessError::ResourceUnavailable("simulated device refused channel".into()));
        }
        self.open_channels.fetch_add(1, Ordering::SeqCst);
        Ok(SimChannel {
            id: self.next_channel.fetch_add(1, Ordering::SeqCst) + 1,
            open_channels: Arc::clone(&self.open_channels),
        })
    }

    fn submit(&self, channel: &mut SimChannel, op: Operation) -> Result<()> {
        let id = self.next_command.fetch_add(1, Ordering::SeqCst);
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, InFlight { op, channel: channel.id, started: Instant::now() });

        std::thread::sleep(self.config.command_latency);

        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
        self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_status_feed(&self) -> Result<String> {
        let attempt = self.feed_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if is_nth(attempt, self.config.feed_failure_every) {
            return Err(HarnessError::FeedUnavailable(format!(
                "simulated read failure on attempt {}",
                attempt
            )));
        }
        let read_number = self.feed_reads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.render_feed(read_number))
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::AnomalyDetector;
    use crate::status::parse_feed;

    fn flagged(feed: &str) -> usize {
        let detector = AnomalyDetector::default();
        parse_feed(feed).filter(|(_, record)| detector.inspect(record).is_some()).count()
    }

    #[test]
    fn test_feed_lists_in_flight_commands() {
        let device = Arc::new(SimulatedDevice::new(SimulationConfig {
            command_latency: Duration::from_millis(200),
            ..SimulationConfig::default()
        }));
        let worker = {
            let device = Arc::clone(&device);
            std::thread::spawn(move || {
                let mut channel = device.open_channel().unwrap();
                device.submit(&mut channel, Operation::WriteOp).unwrap();
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        let feed = device.read_status_feed().unwrap();
        assert!(feed.contains("op=0x0a t_o/elap=60000/"));
        assert_eq!(flagged(&feed), 0);

        worker.join().unwrap();
        assert_eq!(device.submitted(), 1);
        assert_eq!(device.open_channels(), 0);
    }

    #[test]
    fn test_bogus_line_cadence() {
        let device = SimulatedDevice::new(SimulationConfig {
            bogus_every: Some(3),
            ..SimulationConfig::default()
        });
        let counts: Vec<usize> = (0..6).map(|_| flagged(&device.read_status_feed().unwrap())).collect();
        assert_eq!(counts, vec![0, 0, 1, 0, 0, 1]);
    }

    #[test]
    fn test_feed_failures_do_not_advance_reads() {
        let device = SimulatedDevice::new(SimulationConfig {
            feed_failure_every: Some(2),
            ..SimulationConfig::default()
        });
        assert!(device.read_status_feed().is_ok());
        assert!(matches!(device.read_status_feed(), Err(HarnessError::FeedUnavailable(_))));
        assert!(device.read_status_feed().is_ok());
        assert_eq!(device.feed_reads(), 2);
    }

    #[test]
    fn test_refused_channel() {
        let device = SimulatedDevice::new(SimulationConfig {
            refuse_channels: true,
            ..SimulationConfig::default()
        });
        assert!(matches!(device.open_channel(), Err(HarnessError::ResourceUnavailable(_))));
        assert_eq!(device.open_channels(), 0);
    }

    #[test]
    fn test_release_is_recorded() {
        let device = SimulatedDevice::default();
        assert!(!device.is_released());
        device.release();
        assert!(device.is_released());
    }
}
