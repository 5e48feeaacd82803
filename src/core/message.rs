//! # Protocol Messages
//!
//! A `Message` is one decoded protocol unit: fixed header plus opaque payload.
//! Business payloads stay as raw bytes and are interpreted by handlers; the
//! small set of system payloads (auth, error bodies) is typed here and encoded
//! with bincode.
//!
//! Messages are created on decode and discarded after dispatch; they are never
//! persisted.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::core::header::{msg_type, Flags, MessageHeader};
use crate::error::Result;

/// Error codes carried in [`ErrorBody`] payloads.
pub mod error_code {
    /// No handler registered for the message type.
    pub const UNHANDLED_MESSAGE: u16 = 1;
    /// Header validation failed.
    pub const INVALID_MESSAGE: u16 = 2;
    /// Credential rejected.
    pub const AUTH_FAILED: u16 = 3;
    /// Handler or server-side failure.
    pub const INTERNAL: u16 = 4;
}

/// One decoded protocol unit: header + payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Bytes,
}

impl Message {
    /// New request message with the current timestamp.
    pub fn request(message_type: u32, message_id: u32, payload: Bytes) -> Self {
        let mut header = MessageHeader::request(message_type, message_id);
        header.length = payload.len() as u32;
        Self { header, payload }
    }

    /// Response correlated with this message (same id, response bit set).
    pub fn reply(&self, payload: Bytes) -> Self {
        let mut header = self.header.reply();
        header.length = payload.len() as u32;
        Self { header, payload }
    }

    /// Correlated error response carrying an [`ErrorBody`] payload.
    ///
    /// Used for message- and routing-level failures; the connection stays open
    /// and the client can match the response by message id.
    pub fn error_reply(&self, code: u16, detail: impl Into<String>) -> Result<Self> {
        let body = ErrorBody {
            code,
            message: detail.into(),
        };
        let payload = encode_payload(&body)?;
        let mut header = self.header.error_reply();
        header.length = payload.len() as u32;
        Ok(Self { header, payload })
    }

    /// Server-side liveness probe.
    pub fn heartbeat_ping(message_id: u32) -> Self {
        Self::request(msg_type::SYS_HEARTBEAT_PING, message_id, Bytes::new())
    }

    /// Probe reply correlated with the ping.
    pub fn heartbeat_pong(ping: &Message) -> Self {
        let mut header = ping.header.reply();
        header.message_type = msg_type::SYS_HEARTBEAT_PONG;
        header.length = 0;
        Self {
            header,
            payload: Bytes::new(),
        }
    }

    pub fn is_request(&self) -> bool {
        self.header.flags.contains(Flags::REQUEST)
    }

    pub fn is_error(&self) -> bool {
        self.header.flags.contains(Flags::ERROR)
    }

    /// Decode the payload as a typed system body.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        decode_payload(&self.payload)
    }
}

/// Credential presented during the Connected → Authenticated transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub token: String,
}

/// Acknowledgement for a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub player_id: u64,
    pub session_id: String,
}

/// Structured body of an error response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

/// Encode a typed system payload with bincode.
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(bincode::serialize(value)?))
}

/// Decode a typed system payload with bincode.
pub fn decode_payload<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn error_reply_carries_code_and_correlation() {
        let req = Message::request(2_100, 42, Bytes::from_static(b"attack"));
        let resp = req.error_reply(error_code::UNHANDLED_MESSAGE, "no handler").unwrap();

        assert_eq!(resp.header.message_id, 42);
        assert!(resp.is_error());

        let body: ErrorBody = resp.decode_payload().unwrap();
        assert_eq!(body.code, error_code::UNHANDLED_MESSAGE);
        assert_eq!(body.message, "no handler");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn auth_payload_roundtrip() {
        let auth = AuthRequest {
            token: "tok-123".into(),
        };
        let bytes = encode_payload(&auth).unwrap();
        let back: AuthRequest = decode_payload(&bytes).unwrap();
        assert_eq!(auth, back);
    }

    #[test]
    fn pong_correlates_with_ping() {
        let ping = Message::heartbeat_ping(7);
        let pong = Message::heartbeat_pong(&ping);
        assert_eq!(pong.header.message_id, 7);
        assert_eq!(pong.header.message_type, msg_type::SYS_HEARTBEAT_PONG);
        assert!(pong.header.flags.contains(Flags::RESPONSE));
    }
}
