#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mqhttp_client::{ClientError, ConnectOptions, MqttClient, Publish};
use mqhttp_server::broker::{Broker, BrokerHandle, ListenerSpec, MessageHook};
use mqhttp_server::BrokerConfig;
use tokio::sync::watch;

pub struct TestBroker {
    pub addr: SocketAddr,
    pub handle: BrokerHandle,
    shutdown_tx: watch::Sender<()>,
}

impl TestBroker {
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Broker on an ephemeral localhost port. `make_hook` gets the broker handle
/// so a hook can publish back into the broker it is attached to.
pub async fn start_broker<F>(make_hook: F) -> TestBroker
where
    F: FnOnce(BrokerHandle) -> Option<Arc<dyn MessageHook>>,
{
    let mut broker = Broker::new(BrokerConfig::default());
    let addr = broker
        .add_listener(ListenerSpec::tcp("test", "127.0.0.1:0"))
        .await
        .expect("bind test listener");
    let handle = broker.handle();
    if let Some(hook) = make_hook(handle.clone()) {
        broker.set_hook(hook);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(broker.serve(shutdown_rx));

    TestBroker {
        addr,
        handle,
        shutdown_tx,
    }
}

pub async fn plain_broker() -> TestBroker {
    start_broker(|_| None).await
}

pub async fn connect(broker: &TestBroker, client_id: &str) -> MqttClient {
    MqttClient::connect(&broker.addr(), &ConnectOptions::new(client_id))
        .await
        .expect("client connects")
}

/// Waits for one delivery, failing the test instead of hanging.
pub async fn recv(client: &mut MqttClient) -> Publish {
    tokio::time::timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("delivery within 5s")
        .expect("delivery")
}

/// True if nothing arrives within `wait`.
pub async fn stays_quiet(client: &mut MqttClient, wait: Duration) -> bool {
    match tokio::time::timeout(wait, client.recv()).await {
        Err(_) => true,
        Ok(Err(ClientError::ConnectionClosed)) => true,
        Ok(_) => false,
    }
}

pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Speaks MQTT over a bare socket, for cases the client never produces.
pub struct RawConnection {
    stream: tokio::net::TcpStream,
    buf: bytes::BytesMut,
}

impl RawConnection {
    pub async fn open(broker: &TestBroker) -> Self {
        let stream = tokio::net::TcpStream::connect(broker.addr).await.expect("tcp connect");
        Self {
            stream,
            buf: bytes::BytesMut::new(),
        }
    }

    pub async fn send(&mut self, packet: &mqhttp_protocol::Packet) {
        use tokio::io::AsyncWriteExt;
        let mut out = bytes::BytesMut::new();
        packet.encode(&mut out).expect("encodable packet");
        self.stream.write_all(&out).await.expect("raw write");
    }

    /// Next packet, or `None` once the broker has closed the socket.
    pub async fn next(&mut self) -> Option<mqhttp_protocol::Packet> {
        use tokio::io::AsyncReadExt;
        let read = async {
            loop {
                if let Some(packet) =
                    mqhttp_protocol::Packet::decode(&mut self.buf, 64 * 1024).expect("valid packet")
                {
                    return Some(packet);
                }
                match self.stream.read_buf(&mut self.buf).await {
                    Ok(0) | Err(_) => return None,
                    Ok(_) => {}
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), read)
            .await
            .expect("broker answered within 5s")
    }
}
