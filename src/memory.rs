//! In-process publish/subscribe broker
//!
//! Stands in for the PPS filesystem on hosts that do not have one. Every
//! node holds its latest publish plus a sequence number that is bumped on
//! each write; endpoints compare it against the last sequence they read.

use crate::error::{PpsError, Result};
use crate::transport::{ChannelConfig, Endpoint, OpenMode, Transport};
use log::trace;
use rustix::io::Errno;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

#[derive(Default)]
struct NodeState {
    /// Number of publishes so far, 0 = never published
    sequence: u64,
    content: Vec<u8>,
}

#[derive(Default)]
struct Node {
    state: Mutex<NodeState>,
    changed: Condvar,
}

impl Node {
    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A shared namespace of in-memory nodes
///
/// Clones share the same namespace.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    nodes: Arc<Mutex<HashMap<String, Arc<Node>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes created so far
    pub fn node_count(&self) -> usize {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Transport for MemoryTransport {
    type Endpoint = MemoryEndpoint;

    fn open(&self, path: &str, mode: OpenMode, _config: &ChannelConfig) -> Result<MemoryEndpoint> {
        if path.is_empty() {
            return Err(PpsError::InvalidPath(path.to_string()));
        }

        let node = {
            let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
            match nodes.get(path) {
                Some(node) => Arc::clone(node),
                None if mode.contains(OpenMode::CREATE) => {
                    let node = Arc::new(Node::default());
                    nodes.insert(path.to_string(), Arc::clone(&node));
                    node
                }
                None => {
                    return Err(PpsError::Open {
                        path: path.to_string(),
                        source: Errno::NOENT.into(),
                    })
                }
            }
        };

        if mode.contains(OpenMode::TRUNCATE) && mode.can_write() {
            let mut state = node.lock();
            if state.sequence > 0 {
                state.content.clear();
                state.sequence += 1;
                node.changed.notify_all();
            }
        }

        Ok(MemoryEndpoint { node, seen: 0 })
    }
}

/// Open handle on an in-memory node
pub struct MemoryEndpoint {
    node: Arc<Node>,
    seen: u64,
}

impl Endpoint for MemoryEndpoint {
    fn read(&mut self, blocking: bool) -> Result<Vec<u8>> {
        let mut state = self.node.lock();
        loop {
            if state.sequence > self.seen {
                self.seen = state.sequence;
                trace!("memory read seq={} len={}", state.sequence, state.content.len());
                return Ok(state.content.clone());
            }
            if !blocking {
                return Err(PpsError::WouldBlock);
            }
            state = self
                .node
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn write(&mut self, data: &[u8], blocking: bool) -> Result<()> {
        let mut state = if blocking {
            self.node.lock()
        } else {
            match self.node.state.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return Err(PpsError::WouldBlock),
            }
        };

        state.content.clear();
        state.content.extend_from_slice(data);
        state.sequence += 1;
        trace!("memory write seq={} len={}", state.sequence, data.len());
        drop(state);

        self.node.changed.notify_all();
        Ok(())
    }

    fn has_pending(&mut self) -> Result<bool> {
        Ok(self.node.lock().sequence > self.seen)
    }

    fn wait_pending(&mut self, timeout: Duration) -> Result<bool> {
        let seen = self.seen;
        let state = self.node.lock();
        let (state, _) = self
            .node
            .changed
            .wait_timeout_while(state, timeout, |s| s.sequence <= seen)
            .unwrap_or_else(PoisonError::into_inner);
        Ok(state.sequence > seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn open(t: &MemoryTransport, path: &str, mode: OpenMode) -> MemoryEndpoint {
        t.open(path, mode, &ChannelConfig::default()).unwrap()
    }

    #[test]
    fn test_missing_node_without_create() {
        let t = MemoryTransport::new();
        let err = t
            .open("/pps/missing", OpenMode::READ, &ChannelConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.errno(), Errno::NOENT);
        assert_eq!(t.node_count(), 0);
    }

    #[test]
    fn test_last_value_semantics() {
        let t = MemoryTransport::new();
        let mut writer = open(&t, "/pps/a", OpenMode::WRITE | OpenMode::CREATE);
        let mut reader = open(&t, "/pps/a", OpenMode::READ);

        writer.write(b"v::1", true).unwrap();
        writer.write(b"v::2", true).unwrap();

        assert_eq!(reader.read(false).unwrap(), b"v::2");
        assert!(reader.read(false).unwrap_err().is_would_block());
    }

    #[test]
    fn test_late_subscriber_sees_current_value() {
        let t = MemoryTransport::new();
        let mut writer = open(&t, "/pps/b", OpenMode::WRITE | OpenMode::CREATE);
        writer.write(b"x::y", true).unwrap();

        let mut reader = open(&t, "/pps/b", OpenMode::READ);
        assert!(reader.has_pending().unwrap());
        assert_eq!(reader.read(false).unwrap(), b"x::y");
        assert!(!reader.has_pending().unwrap());
    }

    #[test]
    fn test_blocking_read_wakes_on_write() {
        let t = MemoryTransport::new();
        let mut reader = open(&t, "/pps/c", OpenMode::READ | OpenMode::CREATE);

        let t2 = t.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let mut writer = open(&t2, "/pps/c", OpenMode::WRITE);
            writer.write(b"ready:b:true", true).unwrap();
        });

        assert_eq!(reader.read(true).unwrap(), b"ready:b:true");
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_pending_times_out() {
        let t = MemoryTransport::new();
        let mut reader = open(&t, "/pps/d", OpenMode::READ | OpenMode::CREATE);
        assert!(!reader.wait_pending(Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn test_truncate_publishes_empty() {
        let t = MemoryTransport::new();
        let mut writer = open(&t, "/pps/e", OpenMode::WRITE | OpenMode::CREATE);
        writer.write(b"a::b", true).unwrap();

        let mut reader = open(&t, "/pps/e", OpenMode::READ);
        assert_eq!(reader.read(false).unwrap(), b"a::b");

        let _ro = open(&t, "/pps/e", OpenMode::READ | OpenMode::TRUNCATE);
        assert!(reader.read(false).unwrap_err().is_would_block());

        let _trunc = open(&t, "/pps/e", OpenMode::WRITE | OpenMode::TRUNCATE);
        assert_eq!(reader.read(false).unwrap(), b"");
    }
}
