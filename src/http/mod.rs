//! HTTP message model and translation subsystem.
//!
//! # Data Flow
//! ```text
//! Client message / frame (HttpObject)
//!     → message.rs (closed set of HTTP/1.1 messages and HTTP/2 frames)
//!     → convert.rs (HTTP/1.1 head ⇄ HTTP/2 header block)
//!         → headers.rs (ordered HTTP/2 field list)
//!     → compression.rs (accept-encoding rewrite, response transcoding)
//!     → Written to a backend or client channel
//! ```
//!
//! # Design Decisions
//! - Message kinds are a single enum so dispatchers match exhaustively
//! - Conversion is pure; stream bookkeeping lives in `connection`
//! - HTTP/1.1 heads use the `http` crate types, HTTP/2 blocks stay raw

pub mod compression;
pub mod convert;
pub mod headers;
pub mod message;

pub use compression::{CompressionPolicy, Encoding, Transcoder, PROXY_ACCEPT_ENCODING};
pub use convert::ProtocolError;
pub use headers::{HeaderBlock, HeaderField};
pub use message::{
    ErrorCode, Http1Content, Http1Request, Http1Response, Http2Data, Http2GoAway, Http2Headers,
    Http2Ping, Http2Reset, Http2Settings, Http2WindowUpdate, HttpObject, StreamId,
};
