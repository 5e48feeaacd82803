//! # Transport Layer
//!
//! Connection tracking and the TCP server loop.
//!
//! ## Components
//! - **Registry**: live-connection map with broadcast, groups, and inactive
//!   cleanup
//! - **TCP**: framed accept loop with per-connection reader and writer tasks
//!   and graceful shutdown

pub mod registry;
pub mod tcp;

pub use registry::{Connection, ConnectionId, ConnectionRegistry, ConnectionStatus};
