//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → sections handed to Bootstrapper, ClusterMap, logging
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ClusterConfig, CompressionConfig, ConnectionConfig, LogFormat, NodeConfig,
    ObservabilityConfig, ProxyConfig,
};
pub use validation::{validate_config, ValidationError};
