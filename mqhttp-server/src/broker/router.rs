use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use mqhttp_protocol::topic::matches_filter;
use mqhttp_protocol::{Packet, Publish, QoS};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

/// What the router keeps for a live connection.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub connection_id: u64,
    pub tx: mpsc::Sender<Packet>,
    /// Fired when a newer connection takes over the client id.
    pub evict: Arc<Notify>,
}

/// Sessions, subscriptions and retained messages of the broker.
///
/// Sessions are clean: a client's subscriptions go away with its connection.
#[derive(Debug, Default)]
pub struct Router {
    sessions: HashMap<String, SessionHandle>,
    subscriptions: HashMap<String, BTreeSet<String>>,
    retained: HashMap<String, Publish>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under `client_id`, returning the one it replaced.
    pub fn register(&mut self, client_id: &str, handle: SessionHandle) -> Option<SessionHandle> {
        let previous = self.sessions.insert(client_id.to_string(), handle);
        if previous.is_some() {
            self.subscriptions.remove(client_id);
        }
        previous
    }

    /// Removes the session only if it still belongs to `connection_id`; a
    /// connection that was taken over must not tear down its successor.
    pub fn unregister(&mut self, client_id: &str, connection_id: u64) -> bool {
        match self.sessions.get(client_id) {
            Some(handle) if handle.connection_id == connection_id => {
                self.sessions.remove(client_id);
                self.subscriptions.remove(client_id);
                true
            }
            _ => false,
        }
    }

    /// Adds a filter and returns the retained messages it matches.
    pub fn subscribe(&mut self, client_id: &str, filter: &str) -> Vec<Publish> {
        self.subscriptions
            .entry(client_id.to_string())
            .or_default()
            .insert(filter.to_string());

        self.retained
            .values()
            .filter(|retained| matches_filter(filter, &retained.topic))
            .map(|retained| outbound(retained, true))
            .collect()
    }

    pub fn unsubscribe(&mut self, client_id: &str, filter: &str) -> bool {
        match self.subscriptions.get_mut(client_id) {
            Some(filters) => filters.remove(filter),
            None => false,
        }
    }

    /// Updates the retained store and hands the message to every session with
    /// a matching filter. A session gets one copy however many filters match.
    /// Returns how many sessions accepted it.
    pub fn route(&mut self, publish: &Publish) -> usize {
        if publish.retain {
            if publish.payload.is_empty() {
                self.retained.remove(&publish.topic);
            } else {
                self.retained
                    .insert(publish.topic.clone(), outbound(publish, true));
            }
        }

        let mut delivered = 0;
        for (client_id, filters) in &self.subscriptions {
            if !filters.iter().any(|f| matches_filter(f, &publish.topic)) {
                continue;
            }
            let Some(session) = self.sessions.get(client_id) else {
                continue;
            };

            match session.tx.try_send(Packet::Publish(outbound(publish, false))) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client_id = %client_id, topic = %publish.topic, "outbound queue full, message dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(client_id = %client_id, "session closing, message skipped");
                }
            }
        }
        delivered
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }
}

/// Copy of `publish` as it goes out to a subscriber: QoS 0, no packet id.
fn outbound(publish: &Publish, retain: bool) -> Publish {
    Publish {
        topic: publish.topic.clone(),
        payload: publish.payload.clone(),
        qos: QoS::AtMostOnce,
        retain,
        dup: false,
        packet_id: None,
    }
}
