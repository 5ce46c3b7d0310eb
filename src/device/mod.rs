//! Devices the harness can drive.
//!
//! A [`Device`] is the shared handle every load worker holds. Workers open a
//! private [`Device::Channel`] each and submit commands through it; the
//! monitor reads the device's textual status feed. Locating and provisioning
//! the device happens before the harness gets it.

#[cfg(target_os = "linux")]
pub mod sg;
pub mod simulated;

#[cfg(target_os = "linux")]
pub use sg::ScsiGenericDevice;
pub use simulated::{SimulatedDevice, SimulationConfig};

use crate::error::Result;
use crate::operation::Operation;
use std::sync::Arc;

pub trait Device: Send + Sync + 'static {
    /// Per-worker handle, closed when dropped.
    type Channel: Send + 'static;

    /// Human-readable name of the status feed, used in the bug log.
    fn feed_name(&self) -> &str;

    fn open_channel(&self) -> Result<Self::Channel>;

    /// Issue one command and wait for it to complete.
    fn submit(&self, channel: &mut Self::Channel, op: Operation) -> Result<()>;

    /// Capture the entire status feed in one read.
    fn read_status_feed(&self) -> Result<String>;

    /// Called once after every worker has exited.
    fn release(&self) {}
}

/// Lets a caller keep its own reference to the device it hands over.
impl<T: Device> Device for Arc<T> {
    type Channel = T::Channel;

    fn feed_name(&self) -> &str {
        (**self).feed_name()
    }

    fn open_channel(&self) -> Result<Self::Channel> {
        (**self).open_channel()
    }

    fn submit(&self, channel: &mut Self::Channel, op: Operation) -> Result<()> {
        (**self).submit(channel, op)
    }

    fn read_status_feed(&self) -> Result<String> {
        (**self).read_status_feed()
    }

    fn release(&self) {
        (**self).release()
    }
}
