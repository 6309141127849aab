//! The swappable OS binding under a channel
//!
//! A [`Transport`] resolves node paths to [`Endpoint`]s. The filesystem
//! transport talks to a real PPS mount, the memory transport is an
//! in-process broker with the same last-value semantics.

use crate::error::Result;
use bitflags::bitflags;
use std::time::Duration;

/// Default blocking flag applied at open
const DEFAULT_BLOCKING: bool = true;

/// Default largest publish accepted (64KB)
const DEFAULT_MAX_OBJECT_SIZE: usize = 64 * 1024;

/// Default sleep between readiness checks in blocking waits
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

bitflags! {
    /// How a node is opened
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenMode: u32 {
        const READ = 0b0001;
        const WRITE = 0b0010;
        /// Create the node if it does not exist
        const CREATE = 0b0100;
        /// Discard the current content on open
        const TRUNCATE = 0b1000;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl OpenMode {
    pub fn can_read(self) -> bool {
        self.contains(OpenMode::READ)
    }

    pub fn can_write(self) -> bool {
        self.contains(OpenMode::WRITE)
    }
}

/// Channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Blocking flag in effect right after `open`
    pub blocking: bool,
    /// Largest publish accepted by `write`, in bytes
    pub max_object_size: usize,
    /// Sleep between readiness checks where the node offers no wakeup
    pub poll_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            blocking: DEFAULT_BLOCKING,
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Opens nodes in some publish/subscribe namespace
pub trait Transport {
    type Endpoint: Endpoint;

    /// Open `path`. Either returns a fully usable endpoint or fails
    /// without side effects beyond node creation requested by `mode`.
    fn open(&self, path: &str, mode: OpenMode, config: &ChannelConfig) -> Result<Self::Endpoint>;
}

/// An open node, exclusively owned by one channel
///
/// Endpoints remember the last publish they returned. Reads only yield
/// publishes newer than that one.
pub trait Endpoint: Send {
    /// Read the full current content of the node
    ///
    /// With `blocking` false and nothing new published, fails with
    /// `PpsError::WouldBlock`.
    fn read(&mut self, blocking: bool) -> Result<Vec<u8>>;

    /// Replace the content of the node with `data`
    ///
    /// With `blocking` false, fails with `PpsError::WouldBlock` if the
    /// node cannot be taken immediately. Nothing is written in that case.
    fn write(&mut self, data: &[u8], blocking: bool) -> Result<()>;

    /// True if a publish exists that `read` has not returned yet
    fn has_pending(&mut self) -> Result<bool>;

    /// Wait up to `timeout` for [`Endpoint::has_pending`] to become true
    fn wait_pending(&mut self, timeout: Duration) -> Result<bool>;
}
