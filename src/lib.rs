//! HTTP/1.1 ⇄ HTTP/2 bridging proxy engine.

pub mod config;
pub mod connection;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod proxy;

pub use config::schema::ProxyConfig;
pub use connection::{ConnectionError, HttpConnection};
pub use http::HttpObject;
pub use lifecycle::Shutdown;
pub use proxy::{Bootstrapper, ConnectionHandle, UpstreamHandler};
