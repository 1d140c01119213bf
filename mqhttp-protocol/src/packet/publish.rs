/*
fixed header flags: [ dup: 1 | qos: 2 | retain: 1 ]
[ topic     : u16 len + bytes ]
[ packet_id : u16 ]   only when qos > 0
[ payload   : rest of the packet ]
*/

use bytes::{BufMut, Bytes, BytesMut};
use crate::errors::ProtocolError;
use crate::utils::{put_string, read_string, read_u16};
use crate::QoS;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Publish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub packet_id: Option<u16>,
}

impl Publish {
    /// QoS 0, non-retained message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Publish {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
            packet_id: None,
        }
    }

    pub fn flags(&self) -> u8 {
        ((self.dup as u8) << 3) | ((self.qos as u8) << 1) | (self.retain as u8)
    }

    pub fn serialize(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(2 + self.topic.len() + 2 + self.payload.len());
        put_string(&mut buf, &self.topic)?;
        if self.qos != QoS::AtMostOnce {
            buf.put_u16(self.packet_id.unwrap_or_default());
        }
        buf.extend_from_slice(&self.payload);
        Ok(buf.freeze())
    }

    pub fn deserialize(flags: u8, mut buf: Bytes) -> Result<Self, ProtocolError> {
        let qos = QoS::try_from((flags >> 1) & 0b11)?;
        let topic = read_string(&mut buf)?;

        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            let id = read_u16(&mut buf)?;
            if id == 0 {
                return Err(ProtocolError::PayloadError("packet id 0 on qos > 0 publish".into()));
            }
            Some(id)
        };

        Ok(Publish {
            topic,
            payload: buf, // remaining bytes are the application message
            qos,
            retain: flags & 0b0001 != 0,
            dup: flags & 0b1000 != 0,
            packet_id,
        })
    }
}
