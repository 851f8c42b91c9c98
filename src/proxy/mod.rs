//! Proxy adapters.
//!
//! # Data Flow
//! ```text
//! Client object
//!     → upstream.rs (NodeSelector → ConnectionHandle per node)
//!     → bootstrap.rs (connection task: backlog, replay, idle, shutdown)
//!     → HttpConnection::write_and_flush → backend Channel
//!
//! Backend object
//!     → bootstrap.rs (connection task inbound)
//!     → downstream.rs (stream remap, translation, transcoding)
//!     → client Channel
//! ```
//!
//! # Design Decisions
//! - One task per backend connection serializes every read and write for it
//! - The client channel is shared by all backend connections of one client
//! - Routing misses and connect failures are answered with a 502, the
//!   engine never retries on its own

pub mod bootstrap;
pub mod downstream;
pub mod upstream;

pub use bootstrap::{Bootstrapper, ConnectionHandle};
pub use downstream::DownstreamHandler;
pub use upstream::UpstreamHandler;
