use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::errors::{DeserializeError, ProtocolError};

/// Longest string or binary field a two-byte length prefix can describe.
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

pub fn read_bytes(buf: &mut Bytes, len: usize) -> Result<Bytes, DeserializeError> {
    if buf.remaining() < len {
        return Err(DeserializeError::UnexpectedEOF);
    }
    Ok(buf.split_to(len))
}

pub fn read_u8(buf: &mut Bytes) -> Result<u8, DeserializeError> {
    if buf.remaining() < 1 {
        return Err(DeserializeError::UnexpectedEOF);
    }
    Ok(buf.get_u8())
}

pub fn read_u16(buf: &mut Bytes) -> Result<u16, DeserializeError> {
    if buf.remaining() < 2 {
        return Err(DeserializeError::UnexpectedEOF);
    }
    Ok(buf.get_u16())
}

/// Two-byte length prefixed binary field.
pub fn read_binary(buf: &mut Bytes) -> Result<Bytes, DeserializeError> {
    let len = read_u16(buf)? as usize;
    read_bytes(buf, len)
}

pub fn read_string(buf: &mut Bytes) -> Result<String, DeserializeError> {
    let raw = read_binary(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|_| DeserializeError::InvalidUtf8)
}

/// Writes `data` behind its two-byte length. Nothing is written when the
/// field does not fit the prefix.
pub fn put_binary(buf: &mut BytesMut, data: &[u8]) -> Result<(), ProtocolError> {
    let len = u16::try_from(data.len()).map_err(|_| ProtocolError::FieldTooLong {
        len: data.len(),
        max: MAX_FIELD_LEN,
    })?;
    buf.put_u16(len);
    buf.extend_from_slice(data);
    Ok(())
}

pub fn put_string(buf: &mut BytesMut, value: &str) -> Result<(), ProtocolError> {
    put_binary(buf, value.as_bytes())
}
