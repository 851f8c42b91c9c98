//! Backend node abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server and how to reach it
//! - Track live connections to it

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("invalid URL: {0}")]
    Url(String),

    #[error("unsupported scheme '{0}', expected http or https")]
    Scheme(String),

    #[error("missing host")]
    Host,
}

/// A single backend server.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    /// `host:port` to connect to.
    pub address: String,
    /// Parsed node URL.
    pub base_url: Url,
    /// The backend leg is TLS-secured.
    pub secure: bool,
    /// Number of currently live connections.
    pub active_connections: AtomicUsize,
}

impl Node {
    /// Build a node from an `http://` or `https://` URL.
    pub fn parse(name: &str, address: &str) -> Result<Self, NodeError> {
        let base_url = Url::parse(address).map_err(|e| NodeError::Url(e.to_string()))?;
        let secure = match base_url.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(NodeError::Scheme(other.to_string())),
        };
        let host = base_url.host_str().ok_or(NodeError::Host)?;
        let port = base_url.port_or_known_default().unwrap_or(if secure { 443 } else { 80 });

        Ok(Self {
            name: name.to_string(),
            address: format!("{}:{}", host, port),
            base_url,
            secure,
            active_connections: AtomicUsize::new(0),
        })
    }

    /// Number of live connections to this node.
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Count a live connection until the guard is dropped.
    pub fn track_connection(self: &Arc<Self>) -> NodeConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        NodeConnectionGuard { node: self.clone() }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.address)
    }
}

/// A RAII guard that manages the live connection count.
#[derive(Debug)]
pub struct NodeConnectionGuard {
    pub node: Arc<Node>,
}

impl Deref for NodeConnectionGuard {
    type Target = Node;
    fn deref(&self) -> &Self::Target {
        &self.node
    }
}

impl Drop for NodeConnectionGuard {
    fn drop(&mut self) {
        self.node.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}
