pub mod params;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use mqhttp_client::{ConnectOptions, Publisher};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::broker::{Broker, ListenerSpec};
use crate::config::BridgeConfig;
use crate::http::{self, AppState, BasicCredentials};
use crate::relay::RelayHook;
use crate::runtime::{self, shutdown};
use crate::slot::LatestValue;

/// How long stopped tasks get to finish once shutdown is broadcast.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Installs the global subscriber. Level comes from `RUST_LOG`, default `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .compact()
        .init();
}

/// Runs the bridge until a shutdown signal arrives or a component fails.
pub async fn start(config: BridgeConfig) -> anyhow::Result<()> {
    info!("mqhttp starting with config: {:?}", config);
    let config = Arc::new(config);
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let slot = LatestValue::new();

    let mut broker = Broker::new(config.tuning.clone());
    broker
        .add_listener(ListenerSpec::tcp("t1", config.broker_listen.as_str()))
        .await
        .context("starting mqtt listener")?;
    broker.set_hook(Arc::new(RelayHook::new(slot.clone(), broker.handle())));
    let mut broker_task = tokio::spawn(broker.serve(shutdown_rx.clone()));

    let options = ConnectOptions::new(format!("mqhttp-publisher-{}", std::process::id()))
        .with_credentials(config.broker_user.as_str(), config.broker_pass.as_str())
        .with_keep_alive(config.tuning.client_keep_alive)
        .with_connect_timeout(config.tuning.client_connect_timeout)
        .with_max_packet_size(config.tuning.max_packet_size);
    let publisher = match Publisher::connect(&config.broker_url, options, config.tuning.publish_timeout).await {
        Ok(publisher) => publisher,
        Err(e) => {
            shutdown::trigger(&shutdown_tx);
            return Err(anyhow!(e).context(format!("connecting to broker at {}", config.broker_url)));
        }
    };
    let keep_alive = runtime::run(publisher.clone(), shutdown_rx.clone());

    let state = AppState::new(
        slot,
        publisher.clone(),
        BasicCredentials::new(config.http_user.as_str(), config.http_pass.as_str()),
        config.publish_qos,
    )
    .with_body_limit(config.tuning.max_packet_size);
    let mut http_task = tokio::spawn(http::serve(config.http_addr()?, state, shutdown_rx.clone()));

    let outcome = tokio::select! {
        _ = shutdown::wait_for_signal() => Ok(()),
        joined = &mut broker_task => match joined {
            Ok(Ok(())) => Err(anyhow!("broker stopped unexpectedly")),
            Ok(Err(e)) => Err(anyhow!(e).context("broker failed")),
            Err(e) => Err(anyhow!(e).context("broker task panicked")),
        },
        joined = &mut http_task => match joined {
            Ok(Ok(())) => Err(anyhow!("http gateway stopped unexpectedly")),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(anyhow!(e).context("http task panicked")),
        },
    };

    if let Err(e) = &outcome {
        error!("{:#}", e);
    }
    info!("shutting down");
    shutdown::trigger(&shutdown_tx);
    publisher.close().await;

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        drain(broker_task).await;
        drain(http_task).await;
        report_panic(keep_alive.await);
    })
    .await;
    if drained.is_err() {
        warn!("tasks still running after {:?}", DRAIN_TIMEOUT);
    }

    outcome
}

// A handle already consumed by the select above reports finished and is skipped.
async fn drain<T>(task: JoinHandle<T>) {
    if !task.is_finished() {
        report_panic(task.await);
    }
}

fn report_panic<T>(joined: Result<T, JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("background task panicked: {}", e);
        }
    }
}
