//! # Service Layer
//!
//! High-level composition of the protocol core.
//!
//! ## Components
//! - **Server**: wires registry, sessions, heartbeat, and router into one
//!   running TCP server
//! - **Auth**: the credential-verification seam consumed during session
//!   authentication

pub mod auth;
pub mod server;

pub use auth::{Authenticator, TokenTableAuthenticator};
pub use server::GameServer;
