//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → every connection task closes its backend connection
//!     → ConnectionTracker reaches zero → caller exits
//! ```
//!
//! # Design Decisions
//! - One coordinator per Bootstrapper; tasks never outlive it
//! - Shutdown has timeout: callers wait on the tracker with a deadline

pub mod shutdown;

pub use shutdown::{Shutdown, ShutdownSignal};
