use bytes::{BufMut, Bytes, BytesMut};
use crate::errors::ProtocolError;
use crate::utils::{put_string, read_string, read_u16};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub filters: Vec<String>,
}

impl Unsubscribe {
    pub fn serialize(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        buf.put_u16(self.packet_id);
        for filter in &self.filters {
            put_string(&mut buf, filter)?;
        }
        Ok(buf.freeze())
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, ProtocolError> {
        let packet_id = read_u16(&mut buf)?;
        let mut filters = Vec::new();
        while !buf.is_empty() {
            filters.push(read_string(&mut buf)?);
        }
        if filters.is_empty() {
            return Err(ProtocolError::PayloadError("unsubscribe without topic filters".into()));
        }
        Ok(Unsubscribe { packet_id, filters })
    }
}
