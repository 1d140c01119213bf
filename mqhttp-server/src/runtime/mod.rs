/*
Background work that lives as long as the process: the publisher keep-alive
and the shutdown signal every long-running task watches.
*/
use std::sync::Arc;

use mqhttp_client::Publisher;
use tokio::sync::watch::Receiver;
use tokio::task::JoinHandle;

pub mod shutdown;

pub fn run(publisher: Arc<Publisher>, shutdown_rx: Receiver<()>) -> JoinHandle<()> {
    tokio::spawn(publisher.run_keep_alive(shutdown_rx))
}
