//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Bootstrapper
//!     → transport.rs (connect to node, ALPN result)
//!     → Established { channel, inbound, protocol }
//!     → channel.rs (outbound writes, owned by the HttpConnection)
//!     → inbound receiver (read by the connection task)
//! ```
//!
//! # Design Decisions
//! - Socket setup and frame codecs live behind these traits
//! - A connection owns exactly one channel; the client channel is shared
//!   by every backend connection serving that client

pub mod channel;
pub mod transport;

pub use channel::{Channel, ChannelError, MpscChannel};
pub use transport::{ConnectError, Established, Protocol, Transport};
