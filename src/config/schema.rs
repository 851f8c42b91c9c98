//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy
//! engine. All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Backend connection behaviour.
    pub connection: ConnectionConfig,

    /// Accept-encoding rewrite and response transcoding.
    pub compression: CompressionConfig,

    /// Host-keyed backend clusters.
    pub clusters: Vec<ClusterConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Backend connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Writes held while a connection is being established.
    pub backlog_capacity: usize,

    /// Connect + negotiation timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Idle connection timeout in seconds.
    pub idle_timeout_secs: u64,
}

impl ConnectionConfig {
    /// Get the connect timeout as a Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get the idle timeout as a Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backlog_capacity: 100,
            connect_timeout_ms: 10_000,
            idle_timeout_secs: 120,
        }
    }
}

/// Compression settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Rewrite accept-encoding towards backends and transcode responses.
    pub enabled: bool,

    /// Encodings to re-encode responses with, most preferred first.
    pub preference: Vec<String>,

    /// Compression level for gzip/deflate (0-9) and brotli quality.
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            preference: vec!["br".to_string(), "gzip".to_string(), "deflate".to_string()],
            level: 6,
        }
    }
}

/// A group of backend nodes serving one host.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Host (without port) matched against Host / `:authority`.
    pub host: String,

    pub nodes: Vec<NodeConfig>,
}

/// Backend node configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Unique node identifier.
    pub name: String,

    /// Node URL, e.g. "https://10.0.0.1:8443". The scheme selects TLS.
    pub address: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Record metrics through the `metrics` facade.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.connection.backlog_capacity, 100);
        assert_eq!(config.connection.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.compression.preference, vec!["br", "gzip", "deflate"]);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
        assert!(config.clusters.is_empty());
    }

    #[test]
    fn parses_full_config() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [connection]
            backlog_capacity = 10
            idle_timeout_secs = 5

            [compression]
            enabled = false

            [observability]
            log_format = "json"

            [[clusters]]
            host = "example.com"
            nodes = [
                { name = "a", address = "http://127.0.0.1:8080" },
                { name = "b", address = "https://127.0.0.1:8443" },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(config.connection.backlog_capacity, 10);
        assert_eq!(config.connection.connect_timeout_ms, 10_000);
        assert!(!config.compression.enabled);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.clusters[0].nodes.len(), 2);
    }
}
