//! # Message Header
//!
//! Fixed-size binary header shared by every protocol frame.
//!
//! ## Wire Format
//! ```text
//! [Magic(4)] [MessageID(4)] [MessageType(4)] [Flags(2)]
//! [PlayerID(8)] [Timestamp(8)] [Sequence(4)] [Length(4)] [Payload(N)]
//! ```
//! All integers are big-endian. The magic constant is validated before any
//! other field is trusted.
//!
//! ## Message Type Ranges
//! Message types are partitioned into numeric ranges per subsystem (system,
//! player, battle, pet, building, social, item, quest, query) so a header
//! alone is enough to classify a frame.

use crate::error::{ProtocolError, Result};
use crate::utils::time;

/// Magic bytes identifying protocol frames (0x47575245 → "GWRE").
pub const MAGIC: u32 = 0x4757_5245;

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 38;

/// Message type range constants and well-known system types.
pub mod msg_type {
    /// System range: heartbeat, auth, protocol errors.
    pub const SYSTEM_START: u32 = 1;
    pub const SYSTEM_END: u32 = 1_000;
    pub const PLAYER_START: u32 = 1_000;
    pub const PLAYER_END: u32 = 2_000;
    pub const BATTLE_START: u32 = 2_000;
    pub const BATTLE_END: u32 = 3_000;
    pub const PET_START: u32 = 3_000;
    pub const PET_END: u32 = 4_000;
    pub const BUILDING_START: u32 = 4_000;
    pub const BUILDING_END: u32 = 5_000;
    pub const SOCIAL_START: u32 = 5_000;
    pub const SOCIAL_END: u32 = 6_000;
    pub const ITEM_START: u32 = 6_000;
    pub const ITEM_END: u32 = 7_000;
    pub const QUEST_START: u32 = 7_000;
    pub const QUEST_END: u32 = 8_000;
    pub const QUERY_START: u32 = 8_000;
    pub const QUERY_END: u32 = 9_000;

    /// Server → client liveness probe.
    pub const SYS_HEARTBEAT_PING: u32 = 1;
    /// Probe reply.
    pub const SYS_HEARTBEAT_PONG: u32 = 2;
    /// Credential presentation, drives Connected → Authenticated.
    pub const SYS_AUTH: u32 = 10;
    /// Successful authentication acknowledgement.
    pub const SYS_AUTH_OK: u32 = 11;
    /// Session evicted because the player logged in elsewhere.
    pub const SYS_SESSION_EVICTED: u32 = 20;
}

/// Subsystem a message type belongs to, derived from its numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDomain {
    System,
    Player,
    Battle,
    Pet,
    Building,
    Social,
    Item,
    Quest,
    Query,
    Unknown,
}

impl MessageDomain {
    /// Classify a raw message type by its range.
    pub fn of(message_type: u32) -> Self {
        use msg_type::*;
        match message_type {
            t if (SYSTEM_START..SYSTEM_END).contains(&t) => MessageDomain::System,
            t if (PLAYER_START..PLAYER_END).contains(&t) => MessageDomain::Player,
            t if (BATTLE_START..BATTLE_END).contains(&t) => MessageDomain::Battle,
            t if (PET_START..PET_END).contains(&t) => MessageDomain::Pet,
            t if (BUILDING_START..BUILDING_END).contains(&t) => MessageDomain::Building,
            t if (SOCIAL_START..SOCIAL_END).contains(&t) => MessageDomain::Social,
            t if (ITEM_START..ITEM_END).contains(&t) => MessageDomain::Item,
            t if (QUEST_START..QUEST_END).contains(&t) => MessageDomain::Quest,
            t if (QUERY_START..QUERY_END).contains(&t) => MessageDomain::Query,
            _ => MessageDomain::Unknown,
        }
    }
}

/// Header flag bitset: request/response/error/async/broadcast/encrypted/compressed.
///
/// `ENCRYPTED` and `COMPRESSED` are reserved on the wire; this crate does not
/// implement either transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u16);

impl Flags {
    pub const REQUEST: Flags = Flags(0x0001);
    pub const RESPONSE: Flags = Flags(0x0002);
    pub const ERROR: Flags = Flags(0x0004);
    pub const ASYNC: Flags = Flags(0x0008);
    pub const BROADCAST: Flags = Flags(0x0010);
    pub const ENCRYPTED: Flags = Flags(0x0020);
    pub const COMPRESSED: Flags = Flags(0x0040);

    /// Construct from a raw bit pattern. Unknown bits are preserved as-is so
    /// newer peers can carry flags older peers ignore.
    pub fn from_bits(bits: u16) -> Self {
        Flags(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn with(self, other: Flags) -> Self {
        Flags(self.0 | other.0)
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// Fixed-size frame header.
///
/// Created on decode or via the constructors below; `length` is filled in by
/// the codec from the actual payload size on encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: u32,
    /// Request/response correlation id.
    pub message_id: u32,
    pub message_type: u32,
    pub flags: Flags,
    /// 0 for unauthenticated or system messages.
    pub player_id: u64,
    /// Sender-side unix time in milliseconds.
    pub timestamp: i64,
    /// Per-connection monotonic counter, stamped by the writer path.
    pub sequence: u32,
    /// Payload byte count.
    pub length: u32,
}

impl MessageHeader {
    /// New request header with the current timestamp.
    pub fn request(message_type: u32, message_id: u32) -> Self {
        Self {
            magic: MAGIC,
            message_id,
            message_type,
            flags: Flags::REQUEST,
            player_id: 0,
            timestamp: time::unix_ms(),
            sequence: 0,
            length: 0,
        }
    }

    /// Response header correlated with `self` (same message id and type).
    pub fn reply(&self) -> Self {
        Self {
            magic: MAGIC,
            message_id: self.message_id,
            message_type: self.message_type,
            flags: Flags::RESPONSE,
            player_id: self.player_id,
            timestamp: time::unix_ms(),
            sequence: 0,
            length: 0,
        }
    }

    /// Error response header correlated with `self` (error bit set).
    pub fn error_reply(&self) -> Self {
        let mut h = self.reply();
        h.flags = Flags::RESPONSE | Flags::ERROR;
        h
    }

    pub fn domain(&self) -> MessageDomain {
        MessageDomain::of(self.message_type)
    }

    /// Header field validation performed before dispatch.
    ///
    /// Magic must match, message type and id must be non-zero, timestamp must
    /// be positive. Violations are message-level errors: the connection stays
    /// open and the client receives a correlated error response.
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(ProtocolError::InvalidMessage(format!(
                "bad magic 0x{:08X}",
                self.magic
            )));
        }
        if self.message_type == 0 {
            return Err(ProtocolError::InvalidMessage(
                "message type must be non-zero".into(),
            ));
        }
        if self.message_id == 0 {
            return Err(ProtocolError::InvalidMessage(
                "message id must be non-zero".into(),
            ));
        }
        if self.timestamp <= 0 {
            return Err(ProtocolError::InvalidMessage(
                "timestamp must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine_and_test() {
        let f = Flags::RESPONSE | Flags::ERROR;
        assert!(f.contains(Flags::RESPONSE));
        assert!(f.contains(Flags::ERROR));
        assert!(!f.contains(Flags::REQUEST));
        assert_eq!(Flags::from_bits(f.bits()), f);
    }

    #[test]
    fn domain_classification() {
        assert_eq!(
            MessageDomain::of(msg_type::SYS_HEARTBEAT_PING),
            MessageDomain::System
        );
        assert_eq!(MessageDomain::of(1_500), MessageDomain::Player);
        assert_eq!(MessageDomain::of(2_001), MessageDomain::Battle);
        assert_eq!(MessageDomain::of(3_999), MessageDomain::Pet);
        assert_eq!(MessageDomain::of(8_500), MessageDomain::Query);
        assert_eq!(MessageDomain::of(0), MessageDomain::Unknown);
        assert_eq!(MessageDomain::of(50_000), MessageDomain::Unknown);
    }

    #[test]
    fn validation_rejects_bad_fields() {
        let good = MessageHeader::request(1_001, 42);
        assert!(good.validate().is_ok());

        let mut bad = good;
        bad.magic = 0x1234_5678;
        assert!(bad.validate().is_err());

        let mut bad = good;
        bad.message_type = 0;
        assert!(bad.validate().is_err());

        let mut bad = good;
        bad.message_id = 0;
        assert!(bad.validate().is_err());

        let mut bad = good;
        bad.timestamp = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn error_reply_preserves_correlation() {
        let req = MessageHeader::request(6_001, 42);
        let resp = req.error_reply();
        assert_eq!(resp.message_id, 42);
        assert_eq!(resp.message_type, 6_001);
        assert!(resp.flags.contains(Flags::ERROR));
        assert!(resp.flags.contains(Flags::RESPONSE));
    }
}
