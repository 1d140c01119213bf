use std::net::SocketAddr;

use async_trait::async_trait;
use mqhttp_protocol::Publish;

use crate::broker::BrokerError;

/// Who sent an inbound message.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client_id: String,
    pub username: Option<String>,
    pub peer: SocketAddr,
}

/// Called once for every PUBLISH a connected client sends.
///
/// While a hook is installed the broker does not route inbound messages on
/// its own; the hook decides what reaches subscribers, typically through
/// [`BrokerHandle::publish`](crate::broker::BrokerHandle::publish).
/// An error is logged by the broker and the session carries on.
#[async_trait]
pub trait MessageHook: Send + Sync {
    async fn on_message(&self, client: &ClientInfo, publish: &Publish) -> Result<(), BrokerError>;
}
