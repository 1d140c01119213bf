use async_trait::async_trait;
use bytes::Bytes;
use mqhttp_client::{ClientError, Publisher, QoS};

/// Where accepted HTTP writes are sent.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes) -> Result<(), ClientError>;
}

#[async_trait]
impl BrokerPublisher for Publisher {
    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes) -> Result<(), ClientError> {
        Publisher::publish(self, topic, qos, retain, payload).await
    }
}
