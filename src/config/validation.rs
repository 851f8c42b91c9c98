//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacity and timeouts > 0, known encodings)
//! - Check cluster definitions (unique hosts, usable node addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::http::Encoding;
use crate::load_balancer::Node;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("unknown encoding '{0}' in compression.preference")]
    UnknownEncoding(String),

    #[error("compression.level {0} is out of range (0-11)")]
    Level(u32),

    #[error("cluster host must not be empty")]
    EmptyHost,

    #[error("cluster host '{0}' is defined more than once")]
    DuplicateHost(String),

    #[error("cluster '{0}' has no nodes")]
    NoNodes(String),

    #[error("node '{name}' has an invalid address: {reason}")]
    NodeAddress { name: String, reason: String },
}

/// Validate a parsed configuration.
///
/// Every violation is collected, so one run reports them all.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.connection.backlog_capacity == 0 {
        errors.push(ValidationError::Zero("connection.backlog_capacity"));
    }
    if config.connection.connect_timeout_ms == 0 {
        errors.push(ValidationError::Zero("connection.connect_timeout_ms"));
    }
    if config.connection.idle_timeout_secs == 0 {
        errors.push(ValidationError::Zero("connection.idle_timeout_secs"));
    }

    for token in &config.compression.preference {
        if Encoding::from_token(token).is_none() {
            errors.push(ValidationError::UnknownEncoding(token.clone()));
        }
    }
    if config.compression.level > 11 {
        errors.push(ValidationError::Level(config.compression.level));
    }

    let mut hosts = HashSet::new();
    for cluster in &config.clusters {
        let host = cluster.host.trim().to_ascii_lowercase();
        if host.is_empty() {
            errors.push(ValidationError::EmptyHost);
        } else if !hosts.insert(host) {
            errors.push(ValidationError::DuplicateHost(cluster.host.clone()));
        }
        if cluster.nodes.is_empty() {
            errors.push(ValidationError::NoNodes(cluster.host.clone()));
        }
        for node in &cluster.nodes {
            if let Err(e) = Node::parse(&node.name, &node.address) {
                errors.push(ValidationError::NodeAddress {
                    name: node.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
