//! Error types for PpsChannel

use rustix::io::Errno;
use std::io;
use thiserror::Error;

/// Result type for PpsChannel operations
pub type Result<T> = std::result::Result<T, PpsError>;

/// Reasons a record cannot be put on the wire
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    /// Attribute or object name that would break line framing
    #[error("Invalid attribute name '{0}'")]
    InvalidName(String),

    /// NaN and infinities have no decimal or JSON form
    #[error("Attribute '{name}' holds a non-finite number")]
    NonFinite { name: String },
}

/// Errors that can occur in PpsChannel operations
#[derive(Debug, Error)]
pub enum PpsError {
    /// Operation on a closed channel
    #[error("Channel is not open")]
    NotOpen,

    /// `open` called on an already open channel
    #[error("Channel '{0}' is already open")]
    AlreadyOpen(String),

    /// Read on a channel opened without read capability
    #[error("Channel was not opened for reading")]
    NotReadable,

    /// Write on a channel opened without write capability
    #[error("Channel was not opened for writing")]
    NotWritable,

    /// Non-blocking operation could not complete now
    #[error("Operation would block")]
    WouldBlock,

    /// Failed to open the node
    #[error("Failed to open node '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    /// I/O failure on an open node
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    /// Payload larger than the configured object size
    #[error("Buffer overflow: max {max} bytes, got {got} bytes")]
    BufferOverflow { max: usize, got: usize },

    /// Node path cannot be used
    #[error("Invalid node path '{0}'")]
    InvalidPath(String),

    /// Open mode grants neither read nor write
    #[error("Invalid open mode 0x{0:X}")]
    InvalidMode(u32),

    /// Record could not be encoded
    #[error("Encoding failed: {0}")]
    Encode(#[from] EncodeError),

    /// Wire text violates the attribute grammar
    #[error("Decoding failed at line {line}: {reason}")]
    Decode { line: usize, reason: String },
}

impl PpsError {
    /// The OS-level code this error is reported as
    pub fn errno(&self) -> Errno {
        match self {
            PpsError::NotOpen => Errno::BADF,
            PpsError::AlreadyOpen(_) => Errno::BUSY,
            PpsError::NotReadable | PpsError::NotWritable => Errno::BADF,
            PpsError::WouldBlock => Errno::AGAIN,
            PpsError::Open { source, .. } | PpsError::Io(source) => source
                .raw_os_error()
                .map(Errno::from_raw_os_error)
                .unwrap_or(Errno::IO),
            PpsError::BufferOverflow { .. } => Errno::MSGSIZE,
            PpsError::InvalidPath(_) | PpsError::InvalidMode(_) => Errno::INVAL,
            PpsError::Encode(_) | PpsError::Decode { .. } => Errno::INVAL,
        }
    }

    /// True for the recoverable "retry later" outcome of non-blocking mode
    pub fn is_would_block(&self) -> bool {
        matches!(self, PpsError::WouldBlock)
    }

    pub(crate) fn decode(line: usize, reason: impl Into<String>) -> Self {
        PpsError::Decode {
            line,
            reason: reason.into(),
        }
    }
}

impl From<Errno> for PpsError {
    fn from(errno: Errno) -> Self {
        if errno == Errno::AGAIN || errno == Errno::WOULDBLOCK {
            PpsError::WouldBlock
        } else {
            PpsError::Io(errno.into())
        }
    }
}
