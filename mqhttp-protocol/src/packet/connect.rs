/*
[ protocol_name  : u16 len + bytes ]
[ protocol_level : u8 ]
[ connect_flags  : u8 ]  user | pass | will_retain | will_qos(2) | will | clean | reserved
[ keep_alive     : u16 ]
[ client_id      : u16 len + bytes ]
[ will_topic, will_message ]   if will flag
[ username ]                   if user flag
[ password ]                   if pass flag
*/

use bytes::{BufMut, Bytes, BytesMut};
use crate::errors::ProtocolError;
use crate::utils::{put_binary, put_string, read_binary, read_string, read_u16, read_u8};
use crate::QoS;

pub const PROTOCOL_NAME: &str = "MQTT";
pub const PROTOCOL_LEVEL: u8 = 4;
pub const LEGACY_PROTOCOL_NAME: &str = "MQIsdp";
pub const LEGACY_PROTOCOL_LEVEL: u8 = 3;

const FLAG_USERNAME: u8 = 0b1000_0000;
const FLAG_PASSWORD: u8 = 0b0100_0000;
const FLAG_WILL_RETAIN: u8 = 0b0010_0000;
const FLAG_WILL: u8 = 0b0000_0100;
const FLAG_CLEAN_SESSION: u8 = 0b0000_0010;
const FLAG_RESERVED: u8 = 0b0000_0001;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LastWill {
    pub topic: String,
    pub message: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Connect {
    pub protocol_name: String,
    pub protocol_level: u8,
    pub clean_session: bool,
    pub keep_alive: u16, // seconds, 0 = disabled
    pub client_id: String,
    pub will: Option<LastWill>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

impl Connect {
    pub fn new(client_id: impl Into<String>) -> Self {
        Connect {
            protocol_name: PROTOCOL_NAME.to_string(),
            protocol_level: PROTOCOL_LEVEL,
            clean_session: true,
            keep_alive: 60,
            client_id: client_id.into(),
            will: None,
            username: None,
            password: None,
        }
    }

    /// Whether the protocol name/level pair is one this codec speaks.
    pub fn is_supported_protocol(&self) -> bool {
        matches!(
            (self.protocol_name.as_str(), self.protocol_level),
            (PROTOCOL_NAME, PROTOCOL_LEVEL) | (LEGACY_PROTOCOL_NAME, LEGACY_PROTOCOL_LEVEL)
        )
    }

    pub fn serialize(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.protocol_name)?;
        buf.put_u8(self.protocol_level);

        let mut flags = 0u8;
        if self.username.is_some() {
            flags |= FLAG_USERNAME;
        }
        if self.password.is_some() {
            flags |= FLAG_PASSWORD;
        }
        if let Some(will) = &self.will {
            flags |= FLAG_WILL | ((will.qos as u8) << 3);
            if will.retain {
                flags |= FLAG_WILL_RETAIN;
            }
        }
        if self.clean_session {
            flags |= FLAG_CLEAN_SESSION;
        }
        buf.put_u8(flags);
        buf.put_u16(self.keep_alive);

        put_string(&mut buf, &self.client_id)?;
        if let Some(will) = &self.will {
            put_string(&mut buf, &will.topic)?;
            put_binary(&mut buf, &will.message)?;
        }
        if let Some(username) = &self.username {
            put_string(&mut buf, username)?;
        }
        if let Some(password) = &self.password {
            put_binary(&mut buf, password)?;
        }
        Ok(buf.freeze())
    }

    pub fn deserialize(mut buf: Bytes) -> Result<Self, ProtocolError> {
        let protocol_name = read_string(&mut buf)?;
        let protocol_level = read_u8(&mut buf)?;
        let flags = read_u8(&mut buf)?;
        if flags & FLAG_RESERVED != 0 {
            return Err(ProtocolError::PayloadError("reserved connect flag is set".into()));
        }
        let keep_alive = read_u16(&mut buf)?;
        let client_id = read_string(&mut buf)?;

        let will = if flags & FLAG_WILL != 0 {
            let qos = QoS::try_from((flags >> 3) & 0b11)?;
            let topic = read_string(&mut buf)?;
            let message = read_binary(&mut buf)?;
            Some(LastWill {
                topic,
                message,
                qos,
                retain: flags & FLAG_WILL_RETAIN != 0,
            })
        } else {
            if flags & (FLAG_WILL_RETAIN | 0b0001_1000) != 0 {
                return Err(ProtocolError::PayloadError("will options set without will flag".into()));
            }
            None
        };

        let username = if flags & FLAG_USERNAME != 0 {
            Some(read_string(&mut buf)?)
        } else {
            None
        };

        let password = if flags & FLAG_PASSWORD != 0 {
            if username.is_none() {
                return Err(ProtocolError::PayloadError("password flag set without username".into()));
            }
            Some(read_binary(&mut buf)?)
        } else {
            None
        };

        Ok(Connect {
            protocol_name,
            protocol_level,
            clean_session: flags & FLAG_CLEAN_SESSION != 0,
            keep_alive,
            client_id,
            will,
            username,
            password,
        })
    }
}
