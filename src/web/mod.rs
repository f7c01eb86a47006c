use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use warp::Filter;

use crate::error::{ConfigError, HubError, Result};
use crate::plugin::Manager;

pub mod api;
pub mod stream;

const DEFAULT_ADDR: &str = "0.0.0.0:8080";

/// Resolve the listen address from `MCP_HUB_PORT` then `PORT`. A value
/// containing `:` is taken verbatim; a bare value is treated as a port on
/// all interfaces.
pub fn listen_addr() -> Result<SocketAddr> {
    let raw = std::env::var("MCP_HUB_PORT")
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var("PORT").ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let full = if raw.contains(':') {
        raw
    } else {
        format!("0.0.0.0:{raw}")
    };

    full.parse().map_err(|e| {
        ConfigError::Validation(format!("invalid listen address '{full}': {e}")).into()
    })
}

/// Bind the hub's HTTP surface. Returns the bound address and a future that
/// serves until the shutdown channel fires.
pub fn bind(
    addr: SocketAddr,
    manager: Arc<Manager>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(SocketAddr, impl Future<Output = ()>)> {
    let routes = routes(manager);

    warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, async move {
            let _ = shutdown_rx.recv().await;
        })
        .map_err(|e| HubError::Server(format!("failed to bind {addr}: {e}")))
}

fn routes(
    manager: Arc<Manager>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({ "status": "ok" })));

    api::routes(manager.clone())
        .or(stream::route(manager.clone()))
        .or(crate::server::route(manager))
        .or(health)
}
