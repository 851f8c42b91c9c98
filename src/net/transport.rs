//! Backend transport contract.
//!
//! # Responsibilities
//! - Open a connection to a backend node
//! - Report the negotiated protocol exactly once, or the failure
//! - Hand over the outbound channel and the inbound object stream

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::http::HttpObject;
use crate::load_balancer::Node;
use crate::net::channel::Channel;

/// Application protocol negotiated on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http1,
    Http2,
}

impl Protocol {
    /// ALPN identifier.
    pub fn alpn(&self) -> &'static str {
        match self {
            Protocol::Http1 => "http/1.1",
            Protocol::Http2 => "h2",
        }
    }

    /// Protocol for a negotiated ALPN id, if it is one the proxy speaks.
    pub fn from_alpn(id: &[u8]) -> Option<Self> {
        match id {
            b"h2" => Some(Protocol::Http2),
            b"http/1.1" => Some(Protocol::Http1),
            _ => None,
        }
    }

    /// Check if this is HTTP/2.
    pub fn is_http2(&self) -> bool {
        matches!(self, Protocol::Http2)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.alpn())
    }
}

/// Failure to reach or negotiate with a backend.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connection to {0} refused")]
    Refused(String),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol negotiation failed: {0}")]
    Negotiation(String),

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A backend connection whose protocol is known.
pub struct Established {
    /// Outbound side; owned by the connection from here on.
    pub channel: Box<dyn Channel>,
    /// Objects decoded from the backend.
    pub inbound: mpsc::UnboundedReceiver<HttpObject>,
    pub protocol: Protocol,
}

impl std::fmt::Debug for Established {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Established")
            .field("protocol", &self.protocol)
            .field("secure", &self.channel.is_secure())
            .finish()
    }
}

/// Connects to backend nodes.
///
/// The returned future completes once negotiation is over, which is the
/// single "protocol known" signal a connection waits for.
pub trait Transport: Send + Sync + 'static {
    fn connect(&self, node: Arc<Node>) -> BoxFuture<'static, Result<Established, ConnectError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpn_identifiers() {
        assert_eq!(Protocol::from_alpn(b"h2"), Some(Protocol::Http2));
        assert_eq!(Protocol::from_alpn(b"http/1.1"), Some(Protocol::Http1));
        assert_eq!(Protocol::from_alpn(b"spdy/3"), None);
        assert_eq!(Protocol::Http2.to_string(), "h2");
    }
}
