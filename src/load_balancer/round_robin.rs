//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{node::Node, LoadBalancer};

/// Round-robin selector.
/// Stores an internal counter to rotate through nodes.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    /// Create a new round-robin balancer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_node(&self, nodes: &[Arc<Node>]) -> Option<Arc<Node>> {
        if nodes.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % nodes.len();
        Some(nodes[index].clone())
    }
}
