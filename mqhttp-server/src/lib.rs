//! HTTP to MQTT bridge.
//!
//! An embedded [`broker::Broker`] accepts device connections. Every inbound
//! message passes through [`relay::RelayHook`], which stores it in the shared
//! [`slot::LatestValue`] and hands it back to the broker for delivery. The
//! [`http`] gateway serves the slot and turns authenticated writes into
//! publishes over a separate client connection.

pub mod broker;
pub mod config;
pub mod http;
pub mod relay;
pub mod runtime;
pub mod server;
pub mod slot;
mod types;

pub use config::{BridgeConfig, BrokerConfig};
