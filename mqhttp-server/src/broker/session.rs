use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use mqhttp_protocol::packet::{LEGACY_PROTOCOL_NAME, PROTOCOL_NAME};
use mqhttp_protocol::topic::{valid_topic_filter, valid_topic_name};
use mqhttp_protocol::{
    ConnAck, Connect, ConnectReturnCode, LastWill, Packet, PacketType, Publish, QoS, SubAck,
    SubscribeReturnCode,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error, info, warn};

use crate::broker::hook::{ClientInfo, MessageHook};
use crate::broker::router::SessionHandle;
use crate::broker::BrokerError;
use crate::config::BrokerConfig;
use crate::types::SharedRouter;

/// State every connection of one broker shares.
pub(crate) struct BrokerContext {
    pub config: BrokerConfig,
    pub router: SharedRouter,
    pub hook: Option<Arc<dyn MessageHook>>,
    next_connection_id: AtomicU64,
}

impl BrokerContext {
    pub fn new(
        config: BrokerConfig,
        router: SharedRouter,
        hook: Option<Arc<dyn MessageHook>>,
    ) -> Self {
        Self {
            config,
            router,
            hook,
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Inbound messages go to the hook when there is one, else straight to
    /// the router. Hook failures are reported here and go no further.
    async fn dispatch(&self, client: &ClientInfo, publish: &Publish) {
        match &self.hook {
            Some(hook) => {
                if let Err(e) = hook.on_message(client, publish).await {
                    error!(
                        client_id = %client.client_id,
                        topic = %publish.topic,
                        error = %e,
                        "message hook failed"
                    );
                }
            }
            None => {
                let delivered = self.router.lock().await.route(publish);
                debug!(topic = %publish.topic, delivered, "routed");
            }
        }
    }

    async fn publish_will(&self, client_id: &str, will: LastWill) {
        let mut publish = Publish::new(will.topic, will.message);
        publish.retain = will.retain;
        let delivered = self.router.lock().await.route(&publish);
        info!(client_id, topic = %publish.topic, delivered, "will message published");
    }
}

enum Exit {
    Disconnect,
    Closed,
    Evicted,
    Shutdown,
}

enum Flow {
    Continue,
    Disconnect,
}

pub(crate) async fn run(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<BrokerContext>,
    shutdown_rx: watch::Receiver<()>,
) {
    if let Err(e) = handle_connection(stream, peer, ctx, shutdown_rx).await {
        if e.is_disconnect() {
            debug!(%peer, "connection dropped: {}", e);
        } else {
            warn!(%peer, error = %e, "connection closed with error");
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<BrokerContext>,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), BrokerError> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(4096);
    let max = ctx.config.max_packet_size;

    let connect_timeout = ctx.config.connect_timeout;
    let connect = match tokio::time::timeout(connect_timeout, read_connect(&mut reader, &mut buf, max)).await {
        Err(_) => return Err(BrokerError::ConnectTimeout(connect_timeout)),
        Ok(Ok(Some(connect))) => connect,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => return Err(e),
    };

    if !connect.is_supported_protocol() {
        let name = connect.protocol_name.clone();
        if name == PROTOCOL_NAME || name == LEGACY_PROTOCOL_NAME {
            let nack = ConnAck::rejected(ConnectReturnCode::UnacceptableProtocolVersion);
            write_packet(&mut writer, &Packet::ConnAck(nack)).await?;
        }
        return Err(BrokerError::UnsupportedProtocol {
            name,
            level: connect.protocol_level,
        });
    }

    let connection_id = ctx.next_connection_id.fetch_add(1, Ordering::Relaxed);
    let client_id = if connect.client_id.is_empty() {
        if !connect.clean_session {
            let nack = ConnAck::rejected(ConnectReturnCode::IdentifierRejected);
            write_packet(&mut writer, &Packet::ConnAck(nack)).await?;
            return Err(BrokerError::IdentifierRejected);
        }
        format!("auto-{}", connection_id)
    } else {
        connect.client_id.clone()
    };

    let (tx, rx) = mpsc::channel(ctx.config.outbound_capacity.max(1));
    tx.send(Packet::ConnAck(ConnAck::accepted()))
        .await
        .map_err(|_| BrokerError::SessionClosed)?;

    let evict = Arc::new(Notify::new());
    let handle = SessionHandle {
        connection_id,
        tx: tx.clone(),
        evict: evict.clone(),
    };
    if let Some(previous) = ctx.router.lock().await.register(&client_id, handle) {
        info!(client_id = %client_id, "client id taken over by a new connection");
        previous.evict.notify_one();
    }

    let writer_task = tokio::spawn(write_loop(writer, rx));
    let info = ClientInfo {
        client_id: client_id.clone(),
        username: connect.username.clone(),
        peer,
    };
    info!(client_id = %client_id, %peer, keep_alive = connect.keep_alive, "client connected");

    let idle_limit = (connect.keep_alive > 0)
        .then(|| Duration::from_millis(u64::from(connect.keep_alive) * 1500));
    let mut session = Session {
        ctx: &ctx,
        info: &info,
        tx: &tx,
        qos2_inflight: HashSet::new(),
    };
    let result = session
        .read_loop(&mut reader, &mut buf, idle_limit, &evict, &mut shutdown_rx)
        .await;

    ctx.router.lock().await.unregister(&client_id, connection_id);

    let publish_will = match &result {
        Ok(Exit::Disconnect) | Ok(Exit::Shutdown) => false,
        Ok(Exit::Closed) | Ok(Exit::Evicted) | Err(_) => true,
    };
    if let (true, Some(will)) = (publish_will, connect.will) {
        ctx.publish_will(&client_id, will).await;
    }

    drop(session);
    drop(tx);
    let _ = writer_task.await;
    info!(client_id = %client_id, "client disconnected");

    result.map(|_| ())
}

struct Session<'a> {
    ctx: &'a BrokerContext,
    info: &'a ClientInfo,
    tx: &'a mpsc::Sender<Packet>,
    qos2_inflight: HashSet<u16>,
}

impl Session<'_> {
    async fn read_loop(
        &mut self,
        reader: &mut OwnedReadHalf,
        buf: &mut BytesMut,
        idle_limit: Option<Duration>,
        evict: &Notify,
        shutdown_rx: &mut watch::Receiver<()>,
    ) -> Result<Exit, BrokerError> {
        let max = self.ctx.config.max_packet_size;
        loop {
            while let Some(packet) = Packet::decode(buf, max)? {
                if let Flow::Disconnect = self.handle_packet(packet).await? {
                    return Ok(Exit::Disconnect);
                }
            }

            tokio::select! {
                read = read_some(reader, buf, idle_limit) => {
                    if read? == 0 {
                        return Ok(Exit::Closed);
                    }
                }
                _ = evict.notified() => return Ok(Exit::Evicted),
                _ = shutdown_rx.changed() => return Ok(Exit::Shutdown),
            }
        }
    }

    async fn handle_packet(&mut self, packet: Packet) -> Result<Flow, BrokerError> {
        match packet {
            Packet::Publish(publish) => self.handle_publish(publish).await?,
            Packet::PubRel(id) => {
                self.qos2_inflight.remove(&id);
                self.send(Packet::PubComp(id)).await?;
            }
            Packet::Subscribe(subscribe) => {
                let mut return_codes = Vec::with_capacity(subscribe.filters.len());
                let mut replay = Vec::new();
                {
                    let mut router = self.ctx.router.lock().await;
                    for (filter, _requested) in &subscribe.filters {
                        if valid_topic_filter(filter) {
                            replay.extend(router.subscribe(&self.info.client_id, filter));
                            return_codes.push(SubscribeReturnCode::Success(QoS::AtMostOnce));
                        } else {
                            warn!(client_id = %self.info.client_id, filter = %filter, "invalid filter");
                            return_codes.push(SubscribeReturnCode::Failure);
                        }
                    }
                }
                debug!(client_id = %self.info.client_id, filters = ?subscribe.filters, "subscribed");
                self.send(Packet::SubAck(SubAck {
                    packet_id: subscribe.packet_id,
                    return_codes,
                }))
                .await?;
                for retained in replay {
                    self.send(Packet::Publish(retained)).await?;
                }
            }
            Packet::Unsubscribe(unsubscribe) => {
                {
                    let mut router = self.ctx.router.lock().await;
                    for filter in &unsubscribe.filters {
                        router.unsubscribe(&self.info.client_id, filter);
                    }
                }
                self.send(Packet::UnsubAck(unsubscribe.packet_id)).await?;
            }
            Packet::PingReq => self.send(Packet::PingResp).await?,
            Packet::Disconnect => return Ok(Flow::Disconnect),
            // Deliveries go out at QoS 0, so client acks have nothing to settle.
            Packet::PubAck(_) | Packet::PubRec(_) | Packet::PubComp(_) => {}
            other => return Err(BrokerError::UnexpectedPacket(other.packet_type())),
        }
        Ok(Flow::Continue)
    }

    async fn handle_publish(&mut self, publish: Publish) -> Result<(), BrokerError> {
        if !valid_topic_name(&publish.topic) {
            return Err(BrokerError::InvalidTopic(publish.topic));
        }
        debug!(
            client_id = %self.info.client_id,
            topic = %publish.topic,
            qos = ?publish.qos,
            bytes = publish.payload.len(),
            "publish received"
        );

        match (publish.qos, publish.packet_id) {
            (QoS::AtMostOnce, _) => self.ctx.dispatch(self.info, &publish).await,
            (QoS::AtLeastOnce, Some(id)) => {
                self.ctx.dispatch(self.info, &publish).await;
                self.send(Packet::PubAck(id)).await?;
            }
            (QoS::ExactlyOnce, Some(id)) => {
                // a resent PUBLISH before PUBREL must not be delivered twice
                if self.qos2_inflight.insert(id) {
                    self.ctx.dispatch(self.info, &publish).await;
                }
                self.send(Packet::PubRec(id)).await?;
            }
            (_, None) => return Err(BrokerError::UnexpectedPacket(PacketType::Publish)),
        }
        Ok(())
    }

    async fn send(&self, packet: Packet) -> Result<(), BrokerError> {
        self.tx.send(packet).await.map_err(|_| BrokerError::SessionClosed)
    }
}

async fn read_connect(
    reader: &mut OwnedReadHalf,
    buf: &mut BytesMut,
    max: usize,
) -> Result<Option<Connect>, BrokerError> {
    loop {
        if let Some(packet) = Packet::decode(buf, max)? {
            return match packet {
                Packet::Connect(connect) => Ok(Some(connect)),
                other => Err(BrokerError::UnexpectedPacket(other.packet_type())),
            };
        }
        if read_some(reader, buf, None).await? == 0 {
            return Ok(None);
        }
    }
}

async fn read_some(
    reader: &mut OwnedReadHalf,
    buf: &mut BytesMut,
    idle_limit: Option<Duration>,
) -> Result<usize, BrokerError> {
    buf.reserve(4096);
    match idle_limit {
        Some(limit) => match tokio::time::timeout(limit, reader.read_buf(buf)).await {
            Ok(read) => Ok(read?),
            Err(_) => Err(BrokerError::KeepAliveTimeout(limit)),
        },
        None => Ok(reader.read_buf(buf).await?),
    }
}

async fn write_packet(writer: &mut OwnedWriteHalf, packet: &Packet) -> Result<(), BrokerError> {
    let mut out = BytesMut::new();
    packet.encode(&mut out)?;
    writer.write_all(&out).await?;
    writer.flush().await?;
    Ok(())
}

/// Drains the session queue onto the socket, batching whatever is already
/// queued into one write.
async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Packet>) {
    let mut out = BytesMut::with_capacity(4096);
    while let Some(packet) = rx.recv().await {
        encode_queued(&packet, &mut out);
        while let Ok(next) = rx.try_recv() {
            encode_queued(&next, &mut out);
        }
        if let Err(e) = writer.write_all(&out).await {
            debug!("socket write failed: {}", e);
            return;
        }
        out.clear();
    }
    let _ = writer.shutdown().await;
}

// A packet that cannot be encoded is dropped; the rest of the batch still goes out.
fn encode_queued(packet: &Packet, out: &mut BytesMut) {
    if let Err(e) = packet.encode(out) {
        warn!(packet_type = ?packet.packet_type(), "dropping outbound packet: {}", e);
    }
}
