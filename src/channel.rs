//! High-level Channel API for PPS nodes
//!
//! A [`PpsChannel`] wraps one node: open/close lifecycle, a blocking
//! flag, raw reads and writes, and record-level helpers on top of the
//! codec. It is meant for a single owning thread; every mutating call
//! takes `&mut self`.

use crate::codec;
use crate::error::{PpsError, Result};
use crate::fs::FsTransport;
use crate::transport::{ChannelConfig, Endpoint, OpenMode, Transport};
use crate::value::{Record, Value};
use log::{debug, warn};
use rustix::io::Errno;
use std::io;
use std::time::Duration;

/// Client side of one publish/subscribe node
pub struct PpsChannel<T: Transport = FsTransport> {
    path: String,
    transport: T,
    config: ChannelConfig,
    endpoint: Option<T::Endpoint>,
    mode: OpenMode,
    blocking: bool,
    last_error: Option<Errno>,
}

impl PpsChannel<FsTransport> {
    /// Channel on a filesystem node, e.g. `/pps/services/status`
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_transport(path, FsTransport::new(), ChannelConfig::default())
    }
}

impl<T: Transport> PpsChannel<T> {
    /// Channel on `path` in the namespace served by `transport`
    pub fn with_transport(path: impl Into<String>, transport: T, config: ChannelConfig) -> Self {
        let blocking = config.blocking;
        Self {
            path: path.into(),
            transport,
            config,
            endpoint: None,
            mode: OpenMode::empty(),
            blocking,
            last_error: None,
        }
    }

    /// Open the node
    ///
    /// Fails with [`PpsError::AlreadyOpen`] if the channel is open; the
    /// current endpoint is left as it is.
    pub fn open(&mut self, mode: OpenMode) -> Result<()> {
        if self.endpoint.is_some() {
            return self.fail(PpsError::AlreadyOpen(self.path.clone()));
        }
        if !mode.can_read() && !mode.can_write() {
            return self.fail(PpsError::InvalidMode(mode.bits()));
        }

        match self.transport.open(&self.path, mode, &self.config) {
            Ok(endpoint) => {
                self.endpoint = Some(endpoint);
                self.mode = mode;
                self.blocking = self.config.blocking;
                self.last_error = None;
                debug!("opened {} mode={:?} blocking={}", self.path, mode, self.blocking);
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    /// Release the node. Closing a closed channel is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.endpoint.take().is_some() {
            debug!("closed {}", self.path);
        }
        self.mode = OpenMode::empty();
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Mode the channel was opened with, empty while closed
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Change the blocking flag for subsequent reads and writes
    pub fn set_blocking(&mut self, blocking: bool) -> Result<()> {
        if self.endpoint.is_none() {
            return self.fail(PpsError::NotOpen);
        }
        self.blocking = blocking;
        Ok(())
    }

    /// Code of the last failed operation, cleared by a successful `open`
    pub fn last_error(&self) -> Option<Errno> {
        self.last_error
    }

    /// Human readable form of [`PpsChannel::last_error`]
    pub fn error_string(&self) -> Option<String> {
        self.last_error.map(|errno| io::Error::from(errno).to_string())
    }

    /// Read one complete snapshot of the node
    ///
    /// Blocking channels wait for a publish this channel has not read yet.
    /// Non-blocking channels fail with [`PpsError::WouldBlock`] instead.
    pub fn read(&mut self) -> Result<Vec<u8>> {
        let blocking = self.blocking;
        let result = self
            .readable_endpoint()
            .and_then(|endpoint| endpoint.read(blocking));
        self.track(result)
    }

    /// Publish `data`, replacing the node content
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let blocking = self.blocking;
        let max = self.config.max_object_size;
        let result = match self.writable_endpoint() {
            Ok(_) if data.len() > max => Err(PpsError::BufferOverflow {
                max,
                got: data.len(),
            }),
            Ok(endpoint) => endpoint.write(data, blocking),
            Err(e) => Err(e),
        };
        self.track(result)
    }

    /// Read and decode one snapshot
    pub fn read_record(&mut self) -> Result<Record> {
        let bytes = self.read()?;
        let result = codec::decode(&bytes);
        self.track(result)
    }

    /// Encode and publish `record`
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        let bytes = codec::encode(record);
        let bytes = self.track(bytes)?;
        self.write(&bytes)
    }

    /// Publish a server message (`msg`, `dat`)
    pub fn send_message(&mut self, msg: &str, dat: &Value) -> Result<()> {
        let bytes = codec::encode_message(msg, None, dat);
        let bytes = self.track(bytes)?;
        self.write(&bytes)
    }

    /// Publish a server message with a correlation `id`
    pub fn send_message_with_id(&mut self, msg: &str, id: &str, dat: &Value) -> Result<()> {
        let bytes = codec::encode_message(msg, Some(id), dat);
        let bytes = self.track(bytes)?;
        self.write(&bytes)
    }

    /// True if a publish is waiting that `read` has not returned yet
    ///
    /// Does not consume it. Callers drive their own event loop with this
    /// or [`PpsChannel::wait_ready`].
    pub fn is_ready(&mut self) -> Result<bool> {
        let result = self
            .readable_endpoint()
            .and_then(|endpoint| endpoint.has_pending());
        self.track(result)
    }

    /// Wait up to `timeout` for [`PpsChannel::is_ready`] to turn true
    pub fn wait_ready(&mut self, timeout: Duration) -> Result<bool> {
        let result = self
            .readable_endpoint()
            .and_then(|endpoint| endpoint.wait_pending(timeout));
        self.track(result)
    }

    fn readable_endpoint(&mut self) -> Result<&mut T::Endpoint> {
        let mode = self.mode;
        let endpoint = self.endpoint.as_mut().ok_or(PpsError::NotOpen)?;
        if !mode.can_read() {
            return Err(PpsError::NotReadable);
        }
        Ok(endpoint)
    }

    fn writable_endpoint(&mut self) -> Result<&mut T::Endpoint> {
        let mode = self.mode;
        let endpoint = self.endpoint.as_mut().ok_or(PpsError::NotOpen)?;
        if !mode.can_write() {
            return Err(PpsError::NotWritable);
        }
        Ok(endpoint)
    }

    fn track<R>(&mut self, result: Result<R>) -> Result<R> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => self.fail(e),
        }
    }

    fn fail<R>(&mut self, err: PpsError) -> Result<R> {
        if !err.is_would_block() {
            warn!("{}: {}", self.path, err);
        }
        self.last_error = Some(err.errno());
        Err(err)
    }
}
