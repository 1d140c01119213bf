use std::io;
use std::time::Duration;

use mqhttp_protocol::{PacketType, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Failed to bind listener {id} on {addr}: {source}")]
    Bind {
        id: String,
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Listener {id} stopped accepting: {source}")]
    Accept {
        id: String,
        #[source]
        source: io::Error,
    },

    #[error("No listeners configured")]
    NoListeners,

    #[error("No CONNECT received within {0:?}")]
    ConnectTimeout(Duration),

    #[error("Client silent for longer than {0:?}")]
    KeepAliveTimeout(Duration),

    #[error("Unsupported protocol {name:?} level {level}")]
    UnsupportedProtocol { name: String, level: u8 },

    #[error("Client identifier rejected")]
    IdentifierRejected,

    #[error("Unexpected {0:?} packet from client")]
    UnexpectedPacket(PacketType),

    #[error("Invalid topic name: {0:?}")]
    InvalidTopic(String),

    #[error("Session outbound queue closed")]
    SessionClosed,

    #[error("Message hook failed: {0}")]
    Hook(String),

    #[error("Codec error: {0}")]
    Codec(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BrokerError {
    /// Errors that mean the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        match self {
            BrokerError::SessionClosed => true,
            BrokerError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
