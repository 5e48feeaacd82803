//! # Protocol State & Dispatch
//!
//! Session lifecycle, heartbeat supervision, and message-type routing.
//!
//! ## Components
//! - **Session**: per-connection session state machines with a player index
//!   and forced-takeover semantics
//! - **Heartbeat**: single-task liveness probing with missed-count eviction
//! - **Router**: numeric message-type dispatch to registered handlers

pub mod heartbeat;
pub mod router;
pub mod session;

pub use heartbeat::{HeartbeatMonitor, HeartbeatStatus};
pub use router::{Handler, Router};
pub use session::{Session, SessionContext, SessionManager, SessionState};
