use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

/// Size of the data buffer each worker hands to the device.
pub const TRANSFER_BUFFER_SIZE: usize = 512;
pub const CDB_LEN: usize = 6;

const BLOCK_LEN: usize = 512;

const_assert!(BLOCK_LEN <= TRANSFER_BUFFER_SIZE);

/// Data transfer direction of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    None,
    FromDevice,
    ToDevice,
}

/// The fixed set of commands the load workers rotate through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// TEST UNIT READY, no data phase.
    Probe,
    /// READ(6) of one block.
    ReadOp,
    /// WRITE(6) of one block.
    WriteOp,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Probe, Operation::ReadOp, Operation::WriteOp];

    /// Endless Probe, ReadOp, WriteOp, Probe, ... sequence.
    pub fn rotation() -> impl Iterator<Item = Operation> {
        Self::ALL.into_iter().cycle()
    }

    pub fn opcode(self) -> u8 {
        match self {
            Operation::Probe => 0x00,
            Operation::ReadOp => 0x08,
            Operation::WriteOp => 0x0a,
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Operation::Probe => Direction::None,
            Operation::ReadOp => Direction::FromDevice,
            Operation::WriteOp => Direction::ToDevice,
        }
    }

    pub fn transfer_len(self) -> usize {
        match self.direction() {
            Direction::None => 0,
            Direction::FromDevice | Direction::ToDevice => BLOCK_LEN,
        }
    }

    /// Six-byte command descriptor block. Data commands address LBA 0 with a
    /// transfer length of one block.
    pub fn cdb(self) -> [u8; CDB_LEN] {
        match self {
            Operation::Probe => [self.opcode(), 0, 0, 0, 0, 0],
            Operation::ReadOp | Operation::WriteOp => [self.opcode(), 0, 0, 0, 1, 0],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Operation::Probe => "TEST UNIT READY",
            Operation::ReadOp => "READ(6)",
            Operation::WriteOp => "WRITE(6)",
        }
    }

    /// Map an opcode as printed in the status feed (`"0a"`, `"08"`, ...)
    /// back to the operation that issues it.
    pub fn from_opcode_hex(hex: &str) -> Option<Operation> {
        let value = u8::from_str_radix(hex, 16).ok()?;
        Self::ALL.into_iter().find(|op| op.opcode() == value)
    }
}
