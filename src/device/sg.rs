//! Linux SCSI generic (`/dev/sgN`) device driven through `SG_IO`.

use super::Device;
use crate::error::{HarnessError, Result};
use crate::operation::{Direction, Operation, CDB_LEN, TRANSFER_BUFFER_SIZE};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr;
use tracing::{debug, info};

pub const SG_DEBUG_FEED: &str = "/proc/scsi/sg/debug";
const SYSFS_SCSI_GENERIC: &str = "/sys/class/scsi_generic";
const DEV_ROOT: &str = "/dev";

const COMMAND_TIMEOUT_MS: libc::c_uint = 60_000;
const SENSE_LEN: usize = 32;

// <scsi/sg.h>
const SG_IO: libc::c_ulong = 0x2285;
const SG_DXFER_NONE: libc::c_int = -1;
const SG_DXFER_TO_DEV: libc::c_int = -2;
const SG_DXFER_FROM_DEV: libc::c_int = -3;

#[repr(C)]
#[allow(dead_code)]
struct SgIoHdr {
    interface_id: libc::c_int,
    dxfer_direction: libc::c_int,
    cmd_len: libc::c_uchar,
    mx_sb_len: libc::c_uchar,
    iovec_count: libc::c_ushort,
    dxfer_len: libc::c_uint,
    dxferp: *mut libc::c_void,
    cmdp: *mut libc::c_uchar,
    sbp: *mut libc::c_uchar,
    timeout: libc::c_uint,
    flags: libc::c_uint,
    pack_id: libc::c_int,
    usr_ptr: *mut libc::c_void,
    status: libc::c_uchar,
    masked_status: libc::c_uchar,
    msg_status: libc::c_uchar,
    sb_len_wr: libc::c_uchar,
    host_status: libc::c_ushort,
    driver_status: libc::c_ushort,
    resid: libc::c_int,
    duration: libc::c_uint,
    info: libc::c_uint,
}

#[derive(Debug, Clone)]
pub struct ScsiGenericDevice {
    node: PathBuf,
    feed: PathBuf,
}

/// A worker's private open file on the sg node plus its transfer buffers.
pub struct SgChannel {
    file: File,
    buffer: [u8; TRANSFER_BUFFER_SIZE],
    sense: [u8; SENSE_LEN],
}

impl ScsiGenericDevice {
    /// Take `node` as the device under test after checking it can be opened
    /// read/write.
    pub fn acquire(node: impl Into<PathBuf>) -> Result<Self> {
        let device = Self {
            node: node.into(),
            feed: PathBuf::from(SG_DEBUG_FEED),
        };
        device.open_node().map_err(|e| {
            HarnessError::ResourceUnavailable(format!("cannot open {}: {}", device.node.display(), e))
        })?;
        info!(node = %device.node.display(), "sg device acquired");
        Ok(device)
    }

    /// Read the status feed from somewhere other than `/proc/scsi/sg/debug`.
    pub fn with_feed_path(mut self, feed: impl Into<PathBuf>) -> Self {
        self.feed = feed.into();
        self
    }

    pub fn node(&self) -> &Path {
        &self.node
    }

    /// Find the sg node whose SCSI model string contains `model`.
    pub fn discover(model: &str) -> Result<PathBuf> {
        discover_in(Path::new(SYSFS_SCSI_GENERIC), Path::new(DEV_ROOT), model)
    }

    fn open_node(&self) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.node)
    }
}

/// Scan `sysfs_root/sgN/device/model` in ascending N for `model` and return
/// `dev_root/sgN` for the first match that exists.
pub fn discover_in(sysfs_root: &Path, dev_root: &Path, model: &str) -> Result<PathBuf> {
    let entries = std::fs::read_dir(sysfs_root).map_err(|e| {
        HarnessError::ResourceUnavailable(format!("cannot list {}: {}", sysfs_root.display(), e))
    })?;

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("sg"))
        .collect();
    names.sort_by_key(|name| name[2..].parse::<u32>().unwrap_or(u32::MAX));

    for name in names {
        let model_path = sysfs_root.join(&name).join("device").join("model");
        let Ok(found) = std::fs::read_to_string(&model_path) else {
            continue;
        };
        debug!(node = %name, model = found.trim(), "inspected sg node");
        if found.trim().contains(model) {
            let node = dev_root.join(&name);
            if node.exists() {
                return Ok(node);
            }
        }
    }

    Err(HarnessError::ResourceUnavailable(format!(
        "no sg device with model {:?} under {}",
        model,
        sysfs_root.display()
    )))
}

impl Device for ScsiGenericDevice {
    type Channel = SgChannel;

    fn feed_name(&self) -> &str {
        self.feed.to_str().unwrap_or(SG_DEBUG_FEED)
    }

    fn open_channel(&self) -> Result<SgChannel> {
        let file = self.open_node().map_err(|e| {
            HarnessError::ResourceUnavailable(format!("cannot open {}: {}", self.node.display(), e))
        })?;
        Ok(SgChannel {
            file,
            buffer: [0; TRANSFER_BUFFER_SIZE],
            sense: [0; SENSE_LEN],
        })
    }

    fn submit(&self, channel: &mut SgChannel, op: Operation) -> Result<()> {
        let mut cdb = op.cdb();
        let mut hdr = SgIoHdr {
            interface_id: libc::c_int::from(b'S'),
            dxfer_direction: match op.direction() {
                Direction::None => SG_DXFER_NONE,
                Direction::FromDevice => SG_DXFER_FROM_DEV,
                Direction::ToDevice => SG_DXFER_TO_DEV,
            },
            cmd_len: CDB_LEN as libc::c_uchar,
            mx_sb_len: SENSE_LEN as libc::c_uchar,
            iovec_count: 0,
            dxfer_len: op.transfer_len() as libc::c_uint,
            dxferp: channel.buffer.as_mut_ptr().cast(),
            cmdp: cdb.as_mut_ptr(),
            sbp: channel.sense.as_mut_ptr(),
            timeout: COMMAND_TIMEOUT_MS,
            flags: 0,
            pack_id: 0,
            usr_ptr: ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        // SAFETY: every pointer in `hdr` refers to a buffer that outlives the
        // call and is at least as long as the length advertised beside it.
        let rc = unsafe {
            libc::ioctl(
                channel.file.as_raw_fd(),
                SG_IO as _,
                &mut hdr as *mut SgIoHdr,
            )
        };
        if rc < 0 {
            return Err(HarnessError::TransientIo {
                opcode: op.opcode(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn read_status_feed(&self) -> Result<String> {
        let bytes = std::fs::read(&self.feed).map_err(|e| {
            HarnessError::FeedUnavailable(format!("{}: {}", self.feed.display(), e))
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn release(&self) {
        info!(node = %self.node.display(), "sg device released");
    }
}
