//! Node selection subsystem.
//!
//! # Data Flow
//! ```text
//! Client request → routing key (Host / :authority)
//!     → cluster.rs (host → cluster of nodes)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through nodes)
//!     → node.rs (address, TLS flag, live connection count)
//!     → Return node or "not found" (answered with 502)
//! ```
//!
//! # Design Decisions
//! - The upstream adapter only sees `NodeSelector`; clusters are one
//!   implementation of it
//! - Algorithm selection per cluster

pub mod cluster;
pub mod node;
pub mod round_robin;

use std::sync::Arc;

pub use cluster::ClusterMap;
pub use node::{Node, NodeConnectionGuard, NodeError};
pub use round_robin::RoundRobin;

/// Trait for load balancing algorithms.
pub trait LoadBalancer: Send + Sync {
    /// Select the next node from the list.
    fn next_node(&self, nodes: &[Arc<Node>]) -> Option<Arc<Node>>;
}

/// Chooses the backend node for a routing key.
pub trait NodeSelector: Send + Sync {
    fn select(&self, host: &str) -> Option<Arc<Node>>;
}
