use bytes::{BufMut, Bytes, BytesMut};
use crate::errors::ProtocolError;
use crate::utils::{put_string, read_string, read_u16, read_u8};
use crate::QoS;

const SUBACK_FAILURE: u8 = 0x80;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub filters: Vec<(String, QoS)>,
}

impl Subscribe {
    pub fn serialize(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        buf.put_u16(self.packet_id);
        for (filter, qos) in &self.filters {
            put_string(&mut buf, filter)?;
            buf.put_u8(*qos as u8);
        }
        Ok(buf.freeze())
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, ProtocolError> {
        let packet_id = read_u16(&mut buf)?;
        let mut filters = Vec::new();
        while !buf.is_empty() {
            let filter = read_string(&mut buf)?;
            let options = read_u8(&mut buf)?;
            if options & 0b1111_1100 != 0 {
                return Err(ProtocolError::PayloadError("reserved subscription bits set".into()));
            }
            filters.push((filter, QoS::try_from(options)?));
        }
        if filters.is_empty() {
            return Err(ProtocolError::PayloadError("subscribe without topic filters".into()));
        }
        Ok(Subscribe { packet_id, filters })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SubscribeReturnCode {
    Success(QoS),
    Failure,
}

impl From<SubscribeReturnCode> for u8 {
    fn from(code: SubscribeReturnCode) -> u8 {
        match code {
            SubscribeReturnCode::Success(qos) => qos as u8,
            SubscribeReturnCode::Failure => SUBACK_FAILURE,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SubAck {
    pub packet_id: u16,
    pub return_codes: Vec<SubscribeReturnCode>,
}

impl SubAck {
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.return_codes.len());
        buf.put_u16(self.packet_id);
        for code in &self.return_codes {
            buf.put_u8(u8::from(*code));
        }
        buf.freeze()
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, ProtocolError> {
        let packet_id = read_u16(&mut buf)?;
        let mut return_codes = Vec::with_capacity(buf.len());
        while !buf.is_empty() {
            let raw = read_u8(&mut buf)?;
            let code = if raw == SUBACK_FAILURE {
                SubscribeReturnCode::Failure
            } else {
                SubscribeReturnCode::Success(QoS::try_from(raw)?)
            };
            return_codes.push(code);
        }
        Ok(SubAck {
            packet_id,
            return_codes,
        })
    }
}
