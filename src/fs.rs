//! Filesystem-backed nodes
//!
//! Each node is a file: on QNX under the `/pps` mount, elsewhere any
//! directory acting as the namespace. Readers take a shared `flock`
//! around a full positional read and writers take an exclusive one
//! around truncate + write, so a reader never sees half a publish.
//!
//! A publish is identified by the file's inode, size and nanosecond
//! mtime. Writers move the mtime strictly forward on every publish, so
//! republishing identical bytes is still seen as new.

use crate::error::{PpsError, Result};
use crate::transport::{ChannelConfig, Endpoint, OpenMode, Transport};
use log::{trace, warn};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::fs::{flock, fstat, ftruncate, futimens, FlockOperation, Mode, OFlags, Timespec, Timestamps};
use rustix::io::{pread, pwrite, Errno};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Bytes fetched per `pread` call
const READ_CHUNK: usize = 4096;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Opens nodes as files, optionally below a root directory
#[derive(Debug, Clone, Default)]
pub struct FsTransport {
    root: Option<PathBuf>,
}

impl FsTransport {
    /// Node paths are used as given
    pub fn new() -> Self {
        Self::default()
    }

    /// Node paths are resolved below `root`, e.g. `/pps/a` -> `<root>/pps/a`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// File backing the node `path`
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.is_empty() || path.contains('\0') {
            return Err(PpsError::InvalidPath(path.to_string()));
        }
        Ok(match &self.root {
            Some(root) => root.join(path.trim_start_matches('/')),
            None => PathBuf::from(path),
        })
    }
}

impl Transport for FsTransport {
    type Endpoint = FsEndpoint;

    fn open(&self, path: &str, mode: OpenMode, config: &ChannelConfig) -> Result<FsEndpoint> {
        let file = self.resolve(path)?;

        let mut flags = match (mode.can_read(), mode.can_write()) {
            (true, true) => OFlags::RDWR,
            (false, true) => OFlags::WRONLY,
            (true, false) => OFlags::RDONLY,
            (false, false) => return Err(PpsError::InvalidMode(mode.bits())),
        };
        flags |= OFlags::CLOEXEC;
        if mode.contains(OpenMode::CREATE) {
            flags |= OFlags::CREATE;
        }

        let fd = rustix::fs::open(
            file.as_path(),
            flags,
            Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP | Mode::ROTH,
        )
        .map_err(|e| {
            warn!("open {} failed: {}", file.display(), e);
            PpsError::Open {
                path: path.to_string(),
                source: e.into(),
            }
        })?;

        let endpoint = FsEndpoint {
            fd,
            file,
            last: None,
            poll_interval: config.poll_interval,
        };

        // Not O_TRUNC: that would bypass the lock readers hold
        if mode.contains(OpenMode::TRUNCATE) && mode.can_write() {
            endpoint.truncate()?;
        }

        Ok(endpoint)
    }
}

/// Holds an `flock` until dropped
struct FlockGuard<'a> {
    fd: BorrowedFd<'a>,
}

impl<'a> FlockGuard<'a> {
    fn acquire(fd: BorrowedFd<'a>, exclusive: bool, blocking: bool) -> Result<Self> {
        let op = match (exclusive, blocking) {
            (true, true) => FlockOperation::LockExclusive,
            (true, false) => FlockOperation::NonBlockingLockExclusive,
            (false, true) => FlockOperation::LockShared,
            (false, false) => FlockOperation::NonBlockingLockShared,
        };
        loop {
            match flock(fd, op) {
                Ok(()) => return Ok(Self { fd }),
                Err(Errno::INTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for FlockGuard<'_> {
    fn drop(&mut self) {
        let _ = flock(self.fd, FlockOperation::Unlock);
    }
}

/// Identity of one publish as reported by `fstat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    ino: u64,
    size: i64,
    mtime: i64,
    mtime_nsec: i64,
}

impl Stamp {
    fn of(fd: BorrowedFd<'_>) -> Result<Self> {
        let st = fstat(fd)?;
        Ok(Self {
            ino: st.st_ino as u64,
            size: st.st_size as i64,
            mtime: st.st_mtime as i64,
            mtime_nsec: st.st_mtime_nsec as i64,
        })
    }
}

/// Set the mtime past both the wall clock and `prev`
///
/// Kernel timestamps are coarse, so two quick publishes could otherwise
/// share an mtime. Best effort: only the owner may set explicit times.
fn advance_mtime(fd: BorrowedFd<'_>, prev: Stamp) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let (mut sec, mut nsec) = (now.as_secs() as i64, now.subsec_nanos() as i64);
    if (sec, nsec) <= (prev.mtime, prev.mtime_nsec) {
        sec = prev.mtime;
        nsec = prev.mtime_nsec + 1;
        if nsec >= NANOS_PER_SEC {
            sec += 1;
            nsec = 0;
        }
    }

    let ts = Timespec {
        tv_sec: sec as _,
        tv_nsec: nsec as _,
    };
    let times = Timestamps {
        last_access: ts,
        last_modification: ts,
    };
    if let Err(e) = futimens(fd, &times) {
        trace!("futimens failed, keeping kernel mtime: {}", e);
    }
}

/// Open handle on a file node
pub struct FsEndpoint {
    fd: OwnedFd,
    file: PathBuf,
    /// Publish returned by the last successful read
    last: Option<(Stamp, Vec<u8>)>,
    poll_interval: Duration,
}

impl FsEndpoint {
    /// File backing this endpoint
    pub fn file(&self) -> &Path {
        &self.file
    }

    fn snapshot(&self, blocking: bool) -> Result<(Stamp, Vec<u8>)> {
        let _lock = FlockGuard::acquire(self.fd.as_fd(), false, blocking)?;
        let stamp = Stamp::of(self.fd.as_fd())?;

        let mut content = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match pread(&self.fd, &mut chunk, content.len() as u64) {
                Ok(0) => break,
                Ok(n) => content.extend_from_slice(&chunk[..n]),
                Err(Errno::INTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok((stamp, content))
    }

    fn is_new(&self, stamp: &Stamp, content: &[u8]) -> bool {
        match &self.last {
            Some((last_stamp, last)) => last_stamp != stamp || last.as_slice() != content,
            None => !content.is_empty(),
        }
    }

    /// Empty the node under the exclusive lock
    fn truncate(&self) -> Result<()> {
        let _lock = FlockGuard::acquire(self.fd.as_fd(), true, true)?;
        let prev = Stamp::of(self.fd.as_fd())?;
        if prev.size > 0 {
            ftruncate(&self.fd, 0)?;
            advance_mtime(self.fd.as_fd(), prev);
            trace!("fs truncate {}", self.file.display());
        }
        Ok(())
    }
}

impl Endpoint for FsEndpoint {
    fn read(&mut self, blocking: bool) -> Result<Vec<u8>> {
        loop {
            let (stamp, content) = self.snapshot(blocking)?;
            if self.is_new(&stamp, &content) {
                trace!("fs read {} len={}", self.file.display(), content.len());
                self.last = Some((stamp, content.clone()));
                return Ok(content);
            }
            if !blocking {
                return Err(PpsError::WouldBlock);
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn write(&mut self, data: &[u8], blocking: bool) -> Result<()> {
        let _lock = FlockGuard::acquire(self.fd.as_fd(), true, blocking)?;
        let prev = Stamp::of(self.fd.as_fd())?;

        ftruncate(&self.fd, 0)?;
        let mut written = 0;
        while written < data.len() {
            match pwrite(&self.fd, &data[written..], written as u64) {
                Ok(0) => return Err(Errno::IO.into()),
                Ok(n) => written += n,
                Err(Errno::INTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        advance_mtime(self.fd.as_fd(), prev);
        trace!("fs write {} len={}", self.file.display(), data.len());
        Ok(())
    }

    fn has_pending(&mut self) -> Result<bool> {
        // A writer holding the lock means nothing complete to report yet
        match self.snapshot(false) {
            Ok((stamp, content)) => Ok(self.is_new(&stamp, &content)),
            Err(PpsError::WouldBlock) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn wait_pending(&mut self, timeout: Duration) -> Result<bool> {
        // None = too far out to represent, wait without a deadline
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.has_pending()? {
                return Ok(true);
            }
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.poll_interval.min(deadline - now)
                }
                None => self.poll_interval,
            };
            thread::sleep(pause);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> ChannelConfig {
        ChannelConfig {
            poll_interval: Duration::from_millis(2),
            ..ChannelConfig::default()
        }
    }

    #[test]
    fn test_resolve_below_root() {
        let t = FsTransport::with_root("/tmp/ns");
        assert_eq!(t.resolve("/pps/a").unwrap(), PathBuf::from("/tmp/ns/pps/a"));
        assert!(t.resolve("").is_err());
        assert_eq!(FsTransport::new().resolve("/pps/a").unwrap(), PathBuf::from("/pps/a"));
    }

    #[test]
    fn test_open_missing_node() {
        let dir = TempDir::new().unwrap();
        let t = FsTransport::with_root(dir.path());
        let err = t.open("missing", OpenMode::READ, &config()).err().unwrap();
        assert_eq!(err.errno(), Errno::NOENT);
    }

    #[test]
    fn test_invalid_mode() {
        let dir = TempDir::new().unwrap();
        let t = FsTransport::with_root(dir.path());
        let err = t.open("n", OpenMode::CREATE, &config()).err().unwrap();
        assert!(matches!(err, PpsError::InvalidMode(_)));
    }

    #[test]
    fn test_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let t = FsTransport::with_root(dir.path());
        let mut writer = t.open("node", OpenMode::WRITE | OpenMode::CREATE, &config()).unwrap();
        let mut reader = t.open("node", OpenMode::READ, &config()).unwrap();

        assert!(reader.read(false).unwrap_err().is_would_block());

        writer.write(b"long:n:123456", true).unwrap();
        writer.write(b"s::x", true).unwrap();
        assert_eq!(reader.read(false).unwrap(), b"s::x");
        assert!(!reader.has_pending().unwrap());
        assert!(reader.read(false).unwrap_err().is_would_block());

        assert_eq!(std::fs::read(writer.file()).unwrap(), b"s::x");
    }

    #[test]
    fn test_nonblocking_write_under_foreign_lock() {
        let dir = TempDir::new().unwrap();
        let t = FsTransport::with_root(dir.path());
        let mut writer = t.open("locked", OpenMode::WRITE | OpenMode::CREATE, &config()).unwrap();
        writer.write(b"a::1", true).unwrap();

        let other = t.open("locked", OpenMode::READ, &config()).unwrap();
        let held = FlockGuard::acquire(other.fd.as_fd(), true, true).unwrap();

        assert!(writer.write(b"a::2", false).unwrap_err().is_would_block());
        drop(held);

        assert_eq!(std::fs::read(writer.file()).unwrap(), b"a::1");
        writer.write(b"a::2", false).unwrap();
        assert_eq!(std::fs::read(writer.file()).unwrap(), b"a::2");
    }

    #[test]
    fn test_blocking_read_polls_until_publish() {
        let dir = TempDir::new().unwrap();
        let t = FsTransport::with_root(dir.path());
        let mut reader = t.open("wait", OpenMode::READ | OpenMode::CREATE, &config()).unwrap();

        let t2 = t.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            let mut writer = t2.open("wait", OpenMode::WRITE, &config()).unwrap();
            writer.write(b"up:b:true", true).unwrap();
        });

        assert!(!reader.wait_pending(Duration::from_millis(5)).unwrap());
        assert_eq!(reader.read(true).unwrap(), b"up:b:true");
        handle.join().unwrap();
    }
    #[test]
    fn test_identical_republish_is_seen() {
        let dir = TempDir::new().unwrap();
        let t = FsTransport::with_root(dir.path());
        let mut writer = t.open("evt", OpenMode::WRITE | OpenMode::CREATE, &config()).unwrap();
        let mut reader = t.open("evt", OpenMode::READ, &config()).unwrap();

        writer.write(b"evt::press", true).unwrap();
        assert_eq!(reader.read(false).unwrap(), b"evt::press");
        assert!(!reader.has_pending().unwrap());

        writer.write(b"evt::press", true).unwrap();
        assert!(reader.wait_pending(Duration::from_millis(100)).unwrap());
        assert_eq!(reader.read(false).unwrap(), b"evt::press");
        assert!(reader.read(false).unwrap_err().is_would_block());
    }

    #[test]
    fn test_truncate_on_open_publishes_empty() {
        let dir = TempDir::new().unwrap();
        let t = FsTransport::with_root(dir.path());
        let mut writer = t.open("trunc", OpenMode::WRITE | OpenMode::CREATE, &config()).unwrap();
        writer.write(b"a::b", true).unwrap();

        let mut reader = t.open("trunc", OpenMode::READ, &config()).unwrap();
        assert_eq!(reader.read(false).unwrap(), b"a::b");

        // Read-only opens leave the content alone
        let _ro = t.open("trunc", OpenMode::READ | OpenMode::TRUNCATE, &config()).unwrap();
        assert!(reader.read(false).unwrap_err().is_would_block());

        let _trunc = t.open("trunc", OpenMode::WRITE | OpenMode::TRUNCATE, &config()).unwrap();
        assert_eq!(reader.read(false).unwrap(), b"");
        assert_eq!(std::fs::metadata(writer.file()).unwrap().len(), 0);
    }

    #[test]
    fn test_truncate_waits_for_readers_lock() {
        let dir = TempDir::new().unwrap();
        let t = FsTransport::with_root(dir.path());
        let mut writer = t.open("held", OpenMode::WRITE | OpenMode::CREATE, &config()).unwrap();
        writer.write(b"a::b", true).unwrap();

        let reader = t.open("held", OpenMode::READ, &config()).unwrap();
        let held = FlockGuard::acquire(reader.fd.as_fd(), false, true).unwrap();

        let t2 = t.clone();
        let handle = thread::spawn(move || {
            t2.open("held", OpenMode::WRITE | OpenMode::TRUNCATE, &config())
                .map(|_| ())
        });

        thread::sleep(Duration::from_millis(30));
        assert_eq!(std::fs::read(writer.file()).unwrap(), b"a::b");

        drop(held);
        handle.join().unwrap().unwrap();
        assert_eq!(std::fs::read(writer.file()).unwrap(), b"");
    }

    #[test]
    fn test_has_pending_does_not_wait_for_writer_lock() {
        let dir = TempDir::new().unwrap();
        let t = FsTransport::with_root(dir.path());
        let mut writer = t.open("busy", OpenMode::WRITE | OpenMode::CREATE, &config()).unwrap();
        writer.write(b"a::1", true).unwrap();

        let mut reader = t.open("busy", OpenMode::READ, &config()).unwrap();
        let held = FlockGuard::acquire(writer.fd.as_fd(), true, true).unwrap();

        let start = Instant::now();
        assert!(!reader.has_pending().unwrap());
        assert!(start.elapsed() < Duration::from_millis(500));

        drop(held);
        assert!(reader.has_pending().unwrap());
    }
}
