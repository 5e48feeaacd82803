//! # Frame Codec
//!
//! Encodes and decodes complete protocol frames to and from byte streams.
//!
//! Two entry points are provided:
//! - [`encode`] / [`decode`] operate on contiguous buffers and are the
//!   canonical wire-format definition (used heavily by tests).
//! - [`FrameCodec`] implements `tokio_util::codec::{Encoder, Decoder}` so the
//!   TCP transport can drive the same format through `Framed`.
//!
//! ## Security
//! - The declared payload length is validated against the configured maximum
//!   frame size *before* any allocation, so a corrupt or malicious peer cannot
//!   trigger unbounded memory growth.
//! - Magic bytes are checked before any other field is trusted.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::header::{Flags, MessageHeader, HEADER_LEN, MAGIC};
use crate::core::message::Message;
use crate::error::{ProtocolError, Result};

/// Default maximum frame payload size (4 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Serialize a header + payload into a single frame.
///
/// The header's `length` field is overwritten with the actual payload size so
/// a peer reading only the header can allocate an exact-size buffer.
pub fn encode(header: &MessageHeader, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    put_header(&mut buf, header, payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Parse one complete frame from a contiguous buffer.
///
/// Fails with `ShortBuffer` when fewer bytes are available than the header
/// (or the declared payload) requires, `BadMagic` when the magic constant does
/// not match, and `OversizedFrame` when the declared length exceeds
/// `max_frame_size`.
pub fn decode(buf: &[u8], max_frame_size: usize) -> Result<Message> {
    if buf.len() < HEADER_LEN {
        return Err(ProtocolError::ShortBuffer {
            needed: HEADER_LEN,
            available: buf.len(),
        });
    }

    let header = parse_header(buf)?;
    let length = header.length as usize;
    if length > max_frame_size {
        return Err(ProtocolError::OversizedFrame(length));
    }
    if buf.len() < HEADER_LEN + length {
        return Err(ProtocolError::ShortBuffer {
            needed: HEADER_LEN + length,
            available: buf.len(),
        });
    }

    Ok(Message {
        header,
        payload: Bytes::copy_from_slice(&buf[HEADER_LEN..HEADER_LEN + length]),
    })
}

/// Parse the fixed header from the front of `buf`.
///
/// Caller guarantees `buf.len() >= HEADER_LEN`.
fn parse_header(buf: &[u8]) -> Result<MessageHeader> {
    let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }

    let mut rest = &buf[4..HEADER_LEN];
    let message_id = rest.get_u32();
    let message_type = rest.get_u32();
    let flags = Flags::from_bits(rest.get_u16());
    let player_id = rest.get_u64();
    let timestamp = rest.get_i64();
    let sequence = rest.get_u32();
    let length = rest.get_u32();

    Ok(MessageHeader {
        magic,
        message_id,
        message_type,
        flags,
        player_id,
        timestamp,
        sequence,
        length,
    })
}

fn put_header(buf: &mut BytesMut, header: &MessageHeader, length: u32) {
    buf.put_u32(header.magic);
    buf.put_u32(header.message_id);
    buf.put_u32(header.message_type);
    buf.put_u16(header.flags.bits());
    buf.put_u64(header.player_id);
    buf.put_i64(header.timestamp);
    buf.put_u32(header.sequence);
    buf.put_u32(length);
}

/// Tokio codec for framing messages over a byte stream.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        if src.len() < HEADER_LEN {
            // Partial header: wait for more bytes.
            return Ok(None);
        }

        let header = parse_header(src)?;
        let length = header.length as usize;
        if length > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(length));
        }

        let frame_len = HEADER_LEN + length;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(length).freeze();
        Ok(Some(Message { header, payload }))
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<()> {
        if msg.payload.len() > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(msg.payload.len()));
        }

        dst.reserve(HEADER_LEN + msg.payload.len());
        put_header(dst, &msg.header, msg.payload.len() as u32);
        dst.put_slice(&msg.payload);
        Ok(())
    }
}
