pub mod frame;
pub mod packet;
pub mod errors;
pub mod topic;
mod packet_type;
mod qos;
mod utils;


// Public re-exports for easy access
pub use frame::Frame;
pub use packet::{
    ConnAck, Connect, ConnectReturnCode, LastWill, Packet, Publish, SubAck, Subscribe,
    SubscribeReturnCode, Unsubscribe,
};
pub use errors::{DeserializeError, ProtocolError};

pub use packet_type::PacketType;
pub use qos::QoS;
pub use utils::MAX_FIELD_LEN;

/// Upper bound on a single packet when the caller has no tighter limit.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 256 * 1024;
