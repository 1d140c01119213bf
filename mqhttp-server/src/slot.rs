use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// The most recent `(topic, message)` pair seen by the bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub topic: String,
    pub message: String,
}

/// Single shared slot, last write wins. One lock covers both fields so a
/// reader never sees a topic from one write and a message from another.
#[derive(Debug, Clone, Default)]
pub struct LatestValue {
    inner: Arc<RwLock<Reading>>,
}

impl LatestValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, topic: impl Into<String>, message: impl Into<String>) {
        let reading = Reading {
            topic: topic.into(),
            message: message.into(),
        };
        *self.inner.write().await = reading;
    }

    pub async fn snapshot(&self) -> Reading {
        self.inner.read().await.clone()
    }
}
