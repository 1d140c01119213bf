use std::sync::Arc;
use tokio::sync::Mutex;
use crate::broker::router::Router;

pub type SharedRouter = Arc<Mutex<Router>>;
