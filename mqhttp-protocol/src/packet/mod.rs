mod connack;
mod connect;
mod publish;
mod subscribe;
mod unsubscribe;

pub use connack::{ConnAck, ConnectReturnCode};
pub use connect::{
    Connect, LastWill, LEGACY_PROTOCOL_LEVEL, LEGACY_PROTOCOL_NAME, PROTOCOL_LEVEL, PROTOCOL_NAME,
};
pub use publish::Publish;
pub use subscribe::{SubAck, Subscribe, SubscribeReturnCode};
pub use unsubscribe::Unsubscribe;

use bytes::{BufMut, Bytes, BytesMut};
use crate::errors::ProtocolError;
use crate::frame::{Frame, MAX_REMAINING_LENGTH};
use crate::packet_type::PacketType;
use crate::utils::read_u16;

/// Every MQTT 3.1.1 control packet. Acknowledgements that carry nothing but
/// a packet identifier hold it directly.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(u16),
    PubRec(u16),
    PubRel(u16),
    PubComp(u16),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(u16),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::PubRec(_) => PacketType::PubRec,
            Packet::PubRel(_) => PacketType::PubRel,
            Packet::PubComp(_) => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    /// Builds the frame for this packet. Fails when a string or binary field
    /// is longer than its length prefix allows.
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let packet_type = self.packet_type();
        let flags = match self {
            Packet::Publish(publish) => publish.flags(),
            _ => packet_type.required_flags().unwrap_or_default(),
        };
        let body = match self {
            Packet::Connect(connect) => connect.serialize()?,
            Packet::ConnAck(ack) => ack.serialize(),
            Packet::Publish(publish) => publish.serialize()?,
            Packet::PubAck(id)
            | Packet::PubRec(id)
            | Packet::PubRel(id)
            | Packet::PubComp(id)
            | Packet::UnsubAck(id) => packet_id_body(*id),
            Packet::Subscribe(sub) => sub.serialize()?,
            Packet::SubAck(ack) => ack.serialize(),
            Packet::Unsubscribe(unsub) => unsub.serialize()?,
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => Bytes::new(),
        };
        if body.len() > MAX_REMAINING_LENGTH {
            return Err(ProtocolError::PacketTooLarge {
                size: body.len(),
                max: MAX_REMAINING_LENGTH,
            });
        }
        Ok(Frame::new(packet_type, flags, body))
    }

    pub fn from_frame(frame: Frame) -> Result<Packet, ProtocolError> {
        let Frame {
            packet_type,
            flags,
            body,
        } = frame;

        let packet = match packet_type {
            PacketType::Connect => Packet::Connect(Connect::deserialize(body)?),
            PacketType::ConnAck => Packet::ConnAck(ConnAck::deserialize(body)?),
            PacketType::Publish => Packet::Publish(Publish::deserialize(flags, body)?),
            PacketType::PubAck => Packet::PubAck(packet_id_from(body)?),
            PacketType::PubRec => Packet::PubRec(packet_id_from(body)?),
            PacketType::PubRel => Packet::PubRel(packet_id_from(body)?),
            PacketType::PubComp => Packet::PubComp(packet_id_from(body)?),
            PacketType::Subscribe => Packet::Subscribe(Subscribe::deserialize(body)?),
            PacketType::SubAck => Packet::SubAck(SubAck::deserialize(body)?),
            PacketType::Unsubscribe => Packet::Unsubscribe(Unsubscribe::deserialize(body)?),
            PacketType::UnsubAck => Packet::UnsubAck(packet_id_from(body)?),
            PacketType::PingReq => Packet::PingReq,
            PacketType::PingResp => Packet::PingResp,
            PacketType::Disconnect => Packet::Disconnect,
        };
        Ok(packet)
    }

    /// Appends the encoded packet to `buf`. On error `buf` is left untouched.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        self.to_frame()?.encode(buf);
        Ok(())
    }

    /// Decodes the next packet in `buf`, or `None` if it is not complete yet.
    pub fn decode(buf: &mut BytesMut, max_packet_size: usize) -> Result<Option<Packet>, ProtocolError> {
        match Frame::decode(buf, max_packet_size)? {
            Some(frame) => Ok(Some(Packet::from_frame(frame)?)),
            None => Ok(None),
        }
    }
}

fn packet_id_body(id: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u16(id);
    buf.freeze()
}

fn packet_id_from(mut body: Bytes) -> Result<u16, ProtocolError> {
    Ok(read_u16(&mut body)?)
}
