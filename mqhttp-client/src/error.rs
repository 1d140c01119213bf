use std::io;
use std::time::Duration;

use mqhttp_protocol::{ConnectReturnCode, PacketType, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection refused by broker: {0}")]
    Refused(ConnectReturnCode),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed by broker")]
    ConnectionClosed,

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Unexpected {0:?} packet from broker")]
    UnexpectedPacket(PacketType),

    #[error("Subscription to {0} rejected")]
    SubscriptionRejected(String),

    #[error("Invalid broker url: {0}")]
    InvalidUrl(String),

    #[error("Invalid topic name: {0:?}")]
    InvalidTopic(String),

    #[error("Packet of {size} bytes exceeds the {max} byte limit")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Cannot encode packet: {0}")]
    Encode(#[source] ProtocolError),

    #[error("IoError: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ClientError {
    /// Errors after which the TCP stream can no longer be trusted.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionClosed
                | ClientError::NotConnected
                | ClientError::Timeout(_)
                | ClientError::Io(_)
                | ClientError::Protocol(_)
                | ClientError::UnexpectedPacket(_)
        )
    }
}
