//! # gamewire
//!
//! Length-framed binary TCP protocol core for game servers.
//!
//! This crate implements the network-facing core of a game server: the binary
//! wire format, per-connection session lifecycle, heartbeat supervision, and
//! message-type dispatch to pluggable business handlers. Game rules,
//! credential issuance, and persistence are external collaborators consumed
//! through narrow trait seams.
//!
//! ## Architecture
//! - [`core`]: wire format (fixed header, message unit, tokio codec)
//! - [`transport`]: connection registry and the TCP server loop
//! - [`protocol`]: session state machines, heartbeat monitor, router
//! - [`service`]: server composition and the authentication seam
//! - [`config`] / [`error`] / [`utils`]: configuration, error taxonomy,
//!   logging, and metrics
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use gamewire::config::NetworkConfig;
//! use gamewire::core::message::Message;
//! use gamewire::protocol::session::SessionContext;
//! use gamewire::service::{GameServer, TokenTableAuthenticator};
//!
//! #[tokio::main]
//! async fn main() -> gamewire::error::Result<()> {
//!     let config = NetworkConfig::default();
//!     let auth = TokenTableAuthenticator::new().with_token("tok-1", 42);
//!     let server = GameServer::new(config, auth)?;
//!
//!     server.register_handler(1_001, |_ctx: &SessionContext, msg: &Message| {
//!         Ok(Some(msg.reply(msg.payload.clone())))
//!     })?;
//!
//!     Arc::clone(&server).run().await
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::NetworkConfig;
pub use core::codec::FrameCodec;
pub use core::header::{Flags, MessageHeader};
pub use core::message::Message;
pub use error::{ProtocolError, Result};
pub use protocol::heartbeat::HeartbeatMonitor;
pub use protocol::router::{Handler, Router};
pub use protocol::session::{Session, SessionContext, SessionManager, SessionState};
pub use service::{Authenticator, GameServer};
pub use transport::registry::{ConnectionId, ConnectionRegistry};
