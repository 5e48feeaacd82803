//! # Error Types
//!
//! Comprehensive error handling for the game-server protocol core.
//!
//! This module defines all error variants that can occur during protocol
//! operations, from low-level framing errors to session and liveness failures.
//!
//! ## Error Categories
//! - **Frame errors**: bad magic, short buffers, oversized frames. These are
//!   connection-fatal; the peer cannot be trusted to parse a response.
//! - **Message errors**: invalid header fields. Recoverable, reported back to
//!   the client with a correlated error response.
//! - **Session errors**: unknown sessions, illegal state transitions.
//! - **Liveness/capacity errors**: dead connections, full outbound queues.
//!   Connection-fatal.
//!
//! All errors implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

/// Primary error type for all protocol operations.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Fewer bytes available than the fixed header requires.
    #[error("Short buffer: need {needed} bytes, have {available}")]
    ShortBuffer { needed: usize, available: usize },

    /// The first four bytes of a frame did not match the protocol magic.
    #[error("Bad magic: 0x{0:08X}")]
    BadMagic(u32),

    /// Declared payload length exceeds the configured maximum frame size.
    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    /// Header field validation failed (zero type/id, non-positive timestamp).
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A handler is already registered for this message type.
    #[error("Handler already registered for message type {0}")]
    HandlerExists(u32),

    /// Business handler returned an error; contained per-message, never
    /// connection-fatal by itself.
    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Illegal session transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Connection not found: {0}")]
    ConnectionNotFound(u64),

    #[error("Connection closed")]
    ConnectionClosed,

    /// Outbound queue full: the client cannot keep up, treated as fatal.
    #[error("Outbound queue full for connection {0}")]
    ChannelFull(u64),

    /// Missed-heartbeat threshold exceeded.
    #[error("Connection {0} declared dead by heartbeat monitor")]
    ConnectionDead(u64),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Synchronization primitive poisoned: {0}")]
    LockPoisoned(&'static str),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl ProtocolError {
    /// Whether this error must terminate the connection.
    ///
    /// Frame-, liveness- and capacity-level errors are fatal; message-,
    /// routing- and handler-level errors are contained per message.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::ShortBuffer { .. }
                | ProtocolError::BadMagic(_)
                | ProtocolError::OversizedFrame(_)
                | ProtocolError::ConnectionClosed
                | ProtocolError::ChannelFull(_)
                | ProtocolError::ConnectionDead(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_errors_are_fatal() {
        assert!(ProtocolError::BadMagic(0xDEAD_BEEF).is_connection_fatal());
        assert!(ProtocolError::ShortBuffer {
            needed: 38,
            available: 4
        }
        .is_connection_fatal());
        assert!(ProtocolError::OversizedFrame(1 << 30).is_connection_fatal());
        assert!(ProtocolError::ChannelFull(7).is_connection_fatal());
    }

    #[test]
    fn message_errors_are_recoverable() {
        assert!(!ProtocolError::InvalidMessage("zero id".into()).is_connection_fatal());
        assert!(!ProtocolError::HandlerFailed("boom".into()).is_connection_fatal());
        assert!(!ProtocolError::SessionNotFound("s-1".into()).is_connection_fatal());
    }
}
