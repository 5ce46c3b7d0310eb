use std::io;
use thiserror::Error;

/// Failure taxonomy of the harness.
///
/// Only [`HarnessError::ResourceUnavailable`] and [`HarnessError::Config`]
/// end a run. Everything else is absorbed where it happens: a failed command
/// is discarded, an unreadable feed skips one iteration, a failed log write
/// becomes a warning. Malformed feed lines are not an error at all; the
/// parser resolves them to absent fields.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("command {opcode:#04x} failed: {source}")]
    TransientIo {
        opcode: u8,
        #[source]
        source: io::Error,
    },

    #[error("status feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("bug log write failed: {0}")]
    LogWrite(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HarnessError {
    /// Whether this error should terminate the run rather than be absorbed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HarnessError::ResourceUnavailable(_) | HarnessError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
