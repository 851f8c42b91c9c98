//! Backend connection subsystem.
//!
//! # Data Flow
//! ```text
//! write_and_flush(HttpObject)
//!     → http_connection.rs
//!         Initialized → backlog.rs (bounded FIFO)
//!         Active      → translation path → backend Channel
//!         Closed      → discarded
//!     → streams.rs (proxy ⇄ client stream ids, in-flight exchanges)
//!
//! Negotiation result (once):
//!     process_backlog → Active + replay   |   Closed + backlog released
//!
//! Connection States:
//!     Initialized → Active → Closed
//! ```
//!
//! # Design Decisions
//! - The backlog only exists in the Initialized state, the channel only in
//!   Active; the state enum owns them
//! - One connection is driven by one task, so the connection itself needs
//!   no locking; the registry is shared with the response path
//! - The negotiated protocol is write-once

pub mod backlog;
pub mod error;
pub mod http_connection;
pub mod state;
pub mod streams;

pub use backlog::{Backlog, WaitingRequests};
pub use error::ConnectionError;
pub use http_connection::{HttpConnection, PendingTranslation, ReplayReport};
pub use state::{ConnectionGuard, ConnectionId, ConnectionState, ConnectionTracker};
pub use streams::{ClientStream, Exchange, Stream, Streams};
