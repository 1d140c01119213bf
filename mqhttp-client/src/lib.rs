//! Async MQTT 3.1.1 client.
//!
//! [`MqttClient`] is a single sequential connection, good for devices and
//! tests. [`Publisher`] wraps one behind a lock for callers that share a
//! publishing connection across tasks.

pub mod client;
mod error;
mod publisher;
mod url;

pub use client::{ConnectOptions, MqttClient};
pub use error::ClientError;
pub use publisher::Publisher;
pub use url::parse_broker_url;

pub use mqhttp_protocol::{Publish, QoS};
