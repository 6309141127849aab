//! PpsChannel - client for persistent publish/subscribe IPC nodes
//!
//! A node is a named location whose latest publish is readable by every
//! subscriber. Writes replace the current value; nothing is queued.
//!
//! # Layers
//!
//! - **Codec**: `name:type:value` attribute text <-> [`Record`]
//! - **Transport**: opens nodes, either as files ([`FsTransport`], the
//!   QNX `/pps` mount) or in process ([`MemoryTransport`])
//! - **Channel**: [`PpsChannel`] lifecycle, blocking flag and error codes
//!
//! # Example
//!
//! ```no_run
//! use pps_channel::{OpenMode, PpsChannel, Record};
//!
//! let mut channel = PpsChannel::new("/pps/services/demo/status");
//! channel.open(OpenMode::READ_WRITE | OpenMode::CREATE)?;
//! channel.write_record(&Record::new().with("state", "running"))?;
//! let current = channel.read_record()?;
//! # Ok::<(), pps_channel::PpsError>(())
//! ```

pub mod error;
pub mod value;
pub mod codec;
pub mod transport;
pub mod fs;
pub mod memory;
pub mod channel;
pub mod bindings;

pub use channel::PpsChannel;
pub use codec::{decode, encode, encode_message};
pub use error::{EncodeError, PpsError, Result};
pub use fs::FsTransport;
pub use memory::MemoryTransport;
pub use transport::{ChannelConfig, Endpoint, OpenMode, Transport};
pub use value::{Record, Value};
