use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use mqhttp_protocol::topic::{valid_topic_filter, valid_topic_name};
use mqhttp_protocol::{
    ConnectReturnCode, Connect, Packet, Publish, QoS, Subscribe, SubscribeReturnCode, Unsubscribe,
    DEFAULT_MAX_PACKET_SIZE,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::ClientError;

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub max_packet_size: usize,
}

impl ConnectOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        ConnectOptions {
            client_id: client_id.into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Largest packet accepted in either direction.
    pub fn with_max_packet_size(mut self, max: usize) -> Self {
        self.max_packet_size = max;
        self
    }

    fn to_connect(&self) -> Connect {
        let mut connect = Connect::new(self.client_id.clone());
        connect.keep_alive = self.keep_alive.as_secs().min(u16::MAX as u64) as u16;
        connect.username = self.username.clone();
        connect.password = self.password.clone().map(Bytes::from);
        connect
    }
}

/// One MQTT connection. Calls are sequential: each method writes its packet
/// and reads until the matching acknowledgement arrives. PUBLISH packets that
/// show up meanwhile are queued for [`MqttClient::recv`].
pub struct MqttClient {
    stream: TcpStream,
    buf: BytesMut,
    max_packet_size: usize,
    next_packet_id: u16,
    pending: VecDeque<Publish>,
}

impl MqttClient {
    /// Opens the TCP connection and completes the CONNECT/CONNACK handshake
    /// within `options.connect_timeout`.
    pub async fn connect(addr: &str, options: &ConnectOptions) -> Result<Self, ClientError> {
        let timeout = options.connect_timeout;
        tokio::time::timeout(timeout, Self::handshake(addr, options))
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
    }

    async fn handshake(addr: &str, options: &ConnectOptions) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;

        let mut client = MqttClient {
            stream,
            buf: BytesMut::with_capacity(4096),
            max_packet_size: options.max_packet_size,
            next_packet_id: 0,
            pending: VecDeque::new(),
        };

        client.send_packet(&Packet::Connect(options.to_connect())).await?;
        match client.read_packet().await? {
            Packet::ConnAck(ack) if ack.code == ConnectReturnCode::Accepted => {
                debug!(addr, client_id = %options.client_id, "connected to broker");
                Ok(client)
            }
            Packet::ConnAck(ack) => Err(ClientError::Refused(ack.code)),
            other => Err(ClientError::UnexpectedPacket(other.packet_type())),
        }
    }

    pub async fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes>,
    ) -> Result<(), ClientError> {
        if !valid_topic_name(topic) {
            return Err(ClientError::InvalidTopic(topic.to_string()));
        }

        let mut publish = Publish::new(topic, payload);
        publish.qos = qos;
        publish.retain = retain;
        if qos != QoS::AtMostOnce {
            publish.packet_id = Some(self.allocate_packet_id());
        }
        let packet_id = publish.packet_id;

        self.send_packet(&Packet::Publish(publish)).await?;

        match (qos, packet_id) {
            (QoS::AtLeastOnce, Some(id)) => {
                self.wait_for(|p| matches!(p, Packet::PubAck(ack) if *ack == id)).await?;
            }
            (QoS::ExactlyOnce, Some(id)) => {
                self.wait_for(|p| matches!(p, Packet::PubRec(rec) if *rec == id)).await?;
                self.send_packet(&Packet::PubRel(id)).await?;
                self.wait_for(|p| matches!(p, Packet::PubComp(comp) if *comp == id)).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Subscribes to a single filter and returns the QoS granted by the broker.
    pub async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<QoS, ClientError> {
        if !valid_topic_filter(filter) {
            return Err(ClientError::InvalidTopic(filter.to_string()));
        }

        let packet_id = self.allocate_packet_id();
        let subscribe = Subscribe {
            packet_id,
            filters: vec![(filter.to_string(), qos)],
        };
        self.send_packet(&Packet::Subscribe(subscribe)).await?;

        let ack = self
            .wait_for(|p| matches!(p, Packet::SubAck(ack) if ack.packet_id == packet_id))
            .await?;
        match ack {
            Packet::SubAck(ack) => match ack.return_codes.first() {
                Some(SubscribeReturnCode::Success(granted)) => Ok(*granted),
                _ => Err(ClientError::SubscriptionRejected(filter.to_string())),
            },
            other => Err(ClientError::UnexpectedPacket(other.packet_type())),
        }
    }

    pub async fn unsubscribe(&mut self, filter: &str) -> Result<(), ClientError> {
        let packet_id = self.allocate_packet_id();
        let unsubscribe = Unsubscribe {
            packet_id,
            filters: vec![filter.to_string()],
        };
        self.send_packet(&Packet::Unsubscribe(unsubscribe)).await?;
        self.wait_for(|p| matches!(p, Packet::UnsubAck(id) if *id == packet_id))
            .await?;
        Ok(())
    }

    /// Waits for the next application message delivered by the broker.
    pub async fn recv(&mut self) -> Result<Publish, ClientError> {
        if let Some(publish) = self.pending.pop_front() {
            return Ok(publish);
        }
        loop {
            match self.read_packet().await? {
                Packet::Publish(publish) => {
                    self.acknowledge(&publish).await?;
                    return Ok(publish);
                }
                Packet::PubRel(id) => self.send_packet(&Packet::PubComp(id)).await?,
                Packet::PingResp => continue,
                other => return Err(ClientError::UnexpectedPacket(other.packet_type())),
            }
        }
    }

    pub async fn ping(&mut self) -> Result<(), ClientError> {
        self.send_packet(&Packet::PingReq).await?;
        self.wait_for(|p| matches!(p, Packet::PingResp)).await?;
        Ok(())
    }

    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        self.send_packet(&Packet::Disconnect).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Encodes and writes one packet. Packets that cannot be encoded or that
    /// exceed `max_packet_size` are refused before anything reaches the socket.
    async fn send_packet(&mut self, packet: &Packet) -> Result<(), ClientError> {
        let mut out = BytesMut::new();
        packet.encode(&mut out).map_err(ClientError::Encode)?;
        if out.len() > self.max_packet_size {
            return Err(ClientError::PacketTooLarge {
                size: out.len(),
                max: self.max_packet_size,
            });
        }
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_packet(&mut self) -> Result<Packet, ClientError> {
        loop {
            if let Some(packet) = Packet::decode(&mut self.buf, self.max_packet_size)? {
                return Ok(packet);
            }
            self.buf.reserve(4096);
            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
        }
    }

    /// Reads until `expected` matches, parking deliveries and answering
    /// broker-initiated handshakes on the way.
    async fn wait_for<F>(&mut self, expected: F) -> Result<Packet, ClientError>
    where
        F: Fn(&Packet) -> bool,
    {
        loop {
            let packet = self.read_packet().await?;
            if expected(&packet) {
                return Ok(packet);
            }
            match packet {
                Packet::Publish(publish) => {
                    self.acknowledge(&publish).await?;
                    self.pending.push_back(publish);
                }
                Packet::PubRel(id) => self.send_packet(&Packet::PubComp(id)).await?,
                Packet::PingResp => {}
                other => return Err(ClientError::UnexpectedPacket(other.packet_type())),
            }
        }
    }

    async fn acknowledge(&mut self, publish: &Publish) -> Result<(), ClientError> {
        match (publish.qos, publish.packet_id) {
            (QoS::AtLeastOnce, Some(id)) => self.send_packet(&Packet::PubAck(id)).await,
            (QoS::ExactlyOnce, Some(id)) => self.send_packet(&Packet::PubRec(id)).await,
            _ => Ok(()),
        }
    }

    fn allocate_packet_id(&mut self) -> u16 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        if self.next_packet_id == 0 {
            self.next_packet_id = 1;
        }
        self.next_packet_id
    }
}
