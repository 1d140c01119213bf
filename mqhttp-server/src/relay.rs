use async_trait::async_trait;
use chrono::Utc;
use mqhttp_protocol::Publish;
use tracing::info;

use crate::broker::{BrokerError, BrokerHandle, ClientInfo, MessageHook};
use crate::slot::LatestValue;

/// Records every inbound message in the slot and hands it back to the
/// broker for delivery.
pub struct RelayHook {
    slot: LatestValue,
    broker: BrokerHandle,
}

impl RelayHook {
    pub fn new(slot: LatestValue, broker: BrokerHandle) -> Self {
        Self { slot, broker }
    }
}

#[async_trait]
impl MessageHook for RelayHook {
    async fn on_message(&self, client: &ClientInfo, publish: &Publish) -> Result<(), BrokerError> {
        let received_at_us = Utc::now().timestamp_micros();
        let message = String::from_utf8_lossy(&publish.payload).into_owned();
        info!(
            client_id = %client.client_id,
            topic = %publish.topic,
            message = %message,
            received_at_us,
            "mqtt packet received"
        );

        self.slot.set(publish.topic.as_str(), message).await;

        let delivered = self
            .broker
            .publish(&publish.topic, publish.payload.clone(), publish.retain)
            .await?;

        let sent_at_us = Utc::now().timestamp_micros();
        info!(topic = %publish.topic, delivered, sent_at_us, "mqtt packet sent");
        Ok(())
    }
}
