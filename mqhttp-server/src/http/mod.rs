//! HTTP side of the bridge: read the latest value, publish a new one.

mod auth;
mod error;
mod handlers;
mod publisher;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use mqhttp_protocol::{QoS, DEFAULT_MAX_PACKET_SIZE};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use auth::BasicCredentials;
pub use error::{ApiError, StatusBody};
pub use handlers::PublishRequest;
pub use publisher::BrokerPublisher;

use crate::slot::LatestValue;

#[derive(Clone)]
pub struct AppState {
    pub slot: LatestValue,
    pub publisher: Arc<dyn BrokerPublisher>,
    pub credentials: Arc<BasicCredentials>,
    pub publish_qos: QoS,
    /// Largest `POST /publish` body accepted, in bytes.
    pub body_limit: usize,
}

impl AppState {
    pub fn new(
        slot: LatestValue,
        publisher: Arc<dyn BrokerPublisher>,
        credentials: BasicCredentials,
        publish_qos: QoS,
    ) -> Self {
        Self {
            slot,
            publisher,
            credentials: Arc::new(credentials),
            publish_qos,
            body_limit: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/publish", post(handlers::publish))
        .layer(DefaultBodyLimit::max(state.body_limit))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_basic_auth,
        ));

    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/", get(handlers::ready))
        .route("/subscribe/sensor/suhu", get(handlers::latest))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    mut shutdown_rx: watch::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding HTTP listener on {}", addr))?;
    info!(addr = %addr, "http gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await
        .context("http server failed")?;

    info!("http gateway stopped");
    Ok(())
}
