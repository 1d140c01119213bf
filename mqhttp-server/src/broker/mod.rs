//! Embedded MQTT 3.1.1 broker.
//!
//! Each accepted connection runs as a reader task plus a writer task joined by
//! a bounded queue. Routing state lives in one [`Router`] behind a mutex.

mod error;
mod hook;
pub mod router;
mod session;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mqhttp_protocol::topic::valid_topic_name;
use mqhttp_protocol::Publish;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub use error::BrokerError;
pub use hook::{ClientInfo, MessageHook};
pub use router::Router;

use crate::config::BrokerConfig;
use crate::types::SharedRouter;
use session::BrokerContext;

/// A TCP listener to open, identified by `id` in logs.
#[derive(Debug, Clone)]
pub struct ListenerSpec {
    pub id: String,
    pub addr: String,
}

impl ListenerSpec {
    pub fn tcp(id: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            addr: addr.into(),
        }
    }
}

pub struct Broker {
    config: BrokerConfig,
    router: SharedRouter,
    listeners: Vec<(String, TcpListener)>,
    hook: Option<Arc<dyn MessageHook>>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            router: Arc::new(Mutex::new(Router::new())),
            listeners: Vec::new(),
            hook: None,
        }
    }

    /// Binds the listener right away and returns the address it got.
    pub async fn add_listener(&mut self, spec: ListenerSpec) -> Result<SocketAddr, BrokerError> {
        let listener = TcpListener::bind(&spec.addr)
            .await
            .map_err(|source| BrokerError::Bind {
                id: spec.id.clone(),
                addr: spec.addr.clone(),
                source,
            })?;
        let local = listener.local_addr()?;
        info!(listener = %spec.id, addr = %local, "mqtt listener bound");
        self.listeners.push((spec.id, listener));
        Ok(local)
    }

    /// Installs the inbound-message hook. Must happen before [`Broker::serve`],
    /// which takes the broker by value.
    pub fn set_hook(&mut self, hook: Arc<dyn MessageHook>) {
        self.hook = Some(hook);
    }

    pub fn handle(&self) -> BrokerHandle {
        BrokerHandle {
            router: self.router.clone(),
        }
    }

    /// Accepts connections on every listener until `shutdown_rx` fires.
    /// Returns an error if a listener fails in a way a retry cannot fix.
    pub async fn serve(self, shutdown_rx: watch::Receiver<()>) -> Result<(), BrokerError> {
        if self.listeners.is_empty() {
            return Err(BrokerError::NoListeners);
        }

        let ctx = Arc::new(BrokerContext::new(self.config, self.router, self.hook));
        let mut accept_loops = JoinSet::new();
        for (id, listener) in self.listeners {
            accept_loops.spawn(accept_loop(id, listener, ctx.clone(), shutdown_rx.clone()));
        }

        let mut outcome = Ok(());
        while let Some(joined) = accept_loops.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    outcome = Err(e);
                    break;
                }
                Err(e) => {
                    outcome = Err(BrokerError::Io(io::Error::other(e.to_string())));
                    break;
                }
            }
        }
        accept_loops.shutdown().await;
        info!("broker stopped");
        outcome
    }
}

async fn accept_loop(
    id: String,
    listener: TcpListener,
    ctx: Arc<BrokerContext>,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), BrokerError> {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!(listener = %id, %peer, "new incoming connection");
                    tokio::spawn(session::run(socket, peer, ctx.clone(), shutdown_rx.clone()));
                }
                Err(e) if is_transient(&e) => {
                    warn!(listener = %id, error = %e, "accept failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(source) => return Err(BrokerError::Accept { id, source }),
            },
            _ = shutdown_rx.changed() => return Ok(()),
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
    )
}

/// Cloneable handle for injecting messages into a running broker.
#[derive(Clone)]
pub struct BrokerHandle {
    router: SharedRouter,
}

impl BrokerHandle {
    /// Delivers a message to matching subscribers as if a client had sent it.
    /// The inbound hook is not involved. Returns the number of sessions reached.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        retain: bool,
    ) -> Result<usize, BrokerError> {
        if !valid_topic_name(topic) {
            return Err(BrokerError::InvalidTopic(topic.to_string()));
        }
        let mut publish = Publish::new(topic, payload);
        publish.retain = retain;
        Ok(self.router.lock().await.route(&publish))
    }

    pub async fn session_count(&self) -> usize {
        self.router.lock().await.session_count()
    }
}
