//! # Core Protocol Components
//!
//! Low-level frame handling: the fixed binary header, the message unit, and
//! the codec that moves both across byte streams.
//!
//! ## Components
//! - **Header**: fixed 38-byte header with magic bytes, correlation id,
//!   type ranges, and a flag bitset
//! - **Message**: one decoded header + payload unit
//! - **Codec**: tokio codec for framing over byte streams
//!
//! ## Wire Format
//! ```text
//! [Magic(4)] [MessageID(4)] [MessageType(4)] [Flags(2)]
//! [PlayerID(8)] [Timestamp(8)] [Sequence(4)] [Length(4)] [Payload(N)]
//! ```
//!
//! ## Security
//! - Maximum frame size enforced before allocation
//! - Magic bytes checked before any other field is trusted

pub mod codec;
pub mod header;
pub mod message;
