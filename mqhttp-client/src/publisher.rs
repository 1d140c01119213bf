use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mqhttp_protocol::QoS;
use tokio::sync::watch::Receiver;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{ConnectOptions, MqttClient};
use crate::error::ClientError;
use crate::url::parse_broker_url;

/// A long-lived, shareable publishing connection.
///
/// Publishes are serialised over one [`MqttClient`]. A publish that times out
/// or hits an I/O error drops the connection; the next call dials the broker
/// again before publishing.
pub struct Publisher {
    addr: String,
    options: ConnectOptions,
    publish_timeout: Duration,
    conn: Mutex<Option<MqttClient>>,
}

impl Publisher {
    pub async fn connect(
        broker_url: &str,
        options: ConnectOptions,
        publish_timeout: Duration,
    ) -> Result<Arc<Self>, ClientError> {
        let addr = parse_broker_url(broker_url)?;
        let client = MqttClient::connect(&addr, &options).await?;
        info!(addr = %addr, client_id = %options.client_id, "publisher connected");

        Ok(Arc::new(Publisher {
            addr,
            options,
            publish_timeout,
            conn: Mutex::new(Some(client)),
        }))
    }

    pub async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    ) -> Result<(), ClientError> {
        let mut conn = self.conn.lock().await;
        let client = self.ensure_connected(&mut *conn).await?;

        let result = tokio::time::timeout(self.publish_timeout, client.publish(topic, qos, retain, payload))
            .await
            .unwrap_or(Err(ClientError::Timeout(self.publish_timeout)));

        if let Err(e) = &result {
            if e.is_connection_lost() {
                warn!(error = %e, "publisher connection dropped");
                *conn = None;
            }
        }
        result
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        let mut conn = self.conn.lock().await;
        let client = self.ensure_connected(&mut *conn).await?;

        let result = tokio::time::timeout(self.publish_timeout, client.ping())
            .await
            .unwrap_or(Err(ClientError::Timeout(self.publish_timeout)));

        if result.is_err() {
            *conn = None;
        }
        result
    }

    /// Pings at the keep-alive interval so the broker does not drop an idle
    /// publisher. A zero keep-alive turns pinging off. Ends when `shutdown_rx`
    /// fires.
    pub async fn run_keep_alive(self: Arc<Self>, mut shutdown_rx: Receiver<()>) {
        if self.options.keep_alive.is_zero() {
            debug!("publisher keep-alive disabled");
            let _ = shutdown_rx.changed().await;
            return;
        }

        let mut ticker = tokio::time::interval(self.options.keep_alive);
        ticker.tick().await; // first tick completes immediately

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.ping().await {
                        Ok(()) => debug!("publisher keep-alive ok"),
                        Err(e) => warn!(error = %e, "publisher keep-alive failed"),
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
    }

    /// Sends DISCONNECT and drops the connection.
    pub async fn close(&self) {
        if let Some(client) = self.conn.lock().await.take() {
            match client.disconnect().await {
                Ok(()) => info!("publisher disconnected"),
                Err(e) => warn!(error = %e, "publisher disconnect failed"),
            }
        }
    }

    async fn ensure_connected<'a>(
        &self,
        conn: &'a mut Option<MqttClient>,
    ) -> Result<&'a mut MqttClient, ClientError> {
        if conn.is_none() {
            info!(addr = %self.addr, "publisher reconnecting");
            *conn = Some(MqttClient::connect(&self.addr, &self.options).await?);
        }
        conn.as_mut().ok_or(ClientError::NotConnected)
    }
}
