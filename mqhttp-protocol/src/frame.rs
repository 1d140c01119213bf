/*
[ packet_type: 4 bits | flags: 4 bits ]
[ remaining_length: 1..=4 bytes, 7 bits each, high bit = continuation ]
[ body bytes... ]
*/

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::{PacketType, ProtocolError};

/// Largest value the four-byte remaining length can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    pub packet_type: PacketType,
    pub flags: u8,   // low nibble of the first byte
    pub body: Bytes, // variable header + payload
}

impl Frame {
    pub fn new(packet_type: PacketType, flags: u8, body: Bytes) -> Self {
        Frame {
            packet_type,
            flags,
            body,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(5 + self.body.len());
        buf.put_u8(((self.packet_type as u8) << 4) | (self.flags & 0x0F));
        encode_remaining_length(self.body.len(), buf);
        buf.extend_from_slice(&self.body);
    }

    /// Pulls one complete frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` while the frame is still incomplete; the buffer is
    /// left untouched in that case so the caller can read more bytes and retry.
    pub fn decode(buf: &mut BytesMut, max_packet_size: usize) -> Result<Option<Frame>, ProtocolError> {
        if buf.is_empty() {
            return Ok(None);
        }

        let header = buf[0];
        let packet_type = PacketType::try_from(header >> 4)?;
        let flags = header & 0x0F;
        if let Some(required) = packet_type.required_flags() {
            if flags != required {
                return Err(ProtocolError::InvalidFlags { packet_type, flags });
            }
        }

        let Some((remaining, len_bytes)) = decode_remaining_length(&buf[1..])? else {
            return Ok(None); // length bytes not fully available yet
        };

        let total = 1 + len_bytes + remaining;
        if total > max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                size: total,
                max: max_packet_size,
            });
        }
        if buf.len() < total {
            return Ok(None);
        }

        buf.advance(1 + len_bytes);
        let body = buf.split_to(remaining).freeze();

        Ok(Some(Frame {
            packet_type,
            flags,
            body,
        }))
    }
}

pub fn encode_remaining_length(mut len: usize, buf: &mut BytesMut) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

/// Returns `(value, bytes_used)`, or `None` if more bytes are needed.
pub fn decode_remaining_length(bytes: &[u8]) -> Result<Option<(usize, usize)>, ProtocolError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;

    for (i, byte) in bytes.iter().take(4).enumerate() {
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }

    if bytes.len() >= 4 {
        Err(ProtocolError::MalformedRemainingLength)
    } else {
        Ok(None)
    }
}
