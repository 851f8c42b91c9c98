//! Host-keyed cluster map.
//!
//! # Responsibilities
//! - Group configured nodes by the host they serve
//! - Apply the load balancing algorithm to pick a node per request

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ClusterConfig;
use crate::load_balancer::{node::Node, round_robin::RoundRobin, LoadBalancer, NodeSelector};

/// Clusters by lowercase host, each with its own balancer.
pub struct ClusterMap {
    clusters: HashMap<String, (Vec<Arc<Node>>, Box<dyn LoadBalancer>)>,
}

impl ClusterMap {
    /// Build from validated configuration. Unparsable nodes are skipped.
    pub fn new(configs: &[ClusterConfig]) -> Self {
        let mut clusters = HashMap::new();
        for config in configs {
            let nodes: Vec<Arc<Node>> = config
                .nodes
                .iter()
                .filter_map(|node| match Node::parse(&node.name, &node.address) {
                    Ok(parsed) => Some(Arc::new(parsed)),
                    Err(e) => {
                        tracing::warn!(node = %node.name, address = %node.address, error = %e, "Invalid node address");
                        None
                    }
                })
                .collect();
            let lb: Box<dyn LoadBalancer> = Box::new(RoundRobin::new());
            clusters.insert(config.host.trim().to_ascii_lowercase(), (nodes, lb));
        }
        Self { clusters }
    }

    /// Every configured node.
    pub fn all_nodes(&self) -> Vec<Arc<Node>> {
        self.clusters
            .values()
            .flat_map(|(nodes, _)| nodes.iter())
            .cloned()
            .collect()
    }
}

impl NodeSelector for ClusterMap {
    fn select(&self, host: &str) -> Option<Arc<Node>> {
        let (nodes, lb) = self.clusters.get(&normalize_host(host))?;
        let node = lb.next_node(nodes);
        if node.is_none() {
            tracing::debug!(host = %host, "Cluster has no nodes");
        }
        node
    }
}

/// Lowercase a Host / `:authority` value and strip its port.
pub fn normalize_host(authority: &str) -> String {
    let authority = authority.trim();
    let host = if let Some(rest) = authority.strip_prefix('[') {
        // IPv6 literal
        rest.split(']').next().unwrap_or(rest)
    } else {
        authority.rsplit_once(':').map_or(authority, |(host, port)| {
            if port.bytes().all(|b| b.is_ascii_digit()) {
                host
            } else {
                authority
            }
        })
    };
    host.to_ascii_lowercase()
}

impl std::fmt::Debug for ClusterMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.clusters.iter().map(|(host, (nodes, _))| (host, nodes.len())))
            .finish()
    }
}
