use std::io::Error;
use thiserror::Error;

use crate::packet_type::PacketType;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("Invalid fixed header flags {flags:#06b} for {packet_type:?}")]
    InvalidFlags { packet_type: PacketType, flags: u8 },

    #[error("Malformed remaining length")]
    MalformedRemainingLength,

    #[error("Packet of {size} bytes exceeds the {max} byte limit")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Field of {len} bytes exceeds the {max} byte limit")]
    FieldTooLong { len: usize, max: usize },

    #[error("Invalid QoS: {0}")]
    InvalidQoS(u8),

    #[error("Payload decode error: {0}")]
    PayloadError(String),

    #[error("IoError: {0}")]
    IoError(#[from] Error),

    #[error("Packet deserialize error: {0}")]
    PacketDeserializeError(#[from] DeserializeError),
}

#[derive(Debug, Error)]
pub enum DeserializeError {
    #[error("Unexpected end of input")]
    UnexpectedEOF,

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}
