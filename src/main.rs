use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use mcp_hub::config;
use mcp_hub::error::Result;
use mcp_hub::plugin::Manager;
use mcp_hub::registry::ToolRegistry;
use mcp_hub::watcher::ConfigWatcher;
use mcp_hub::web;

#[derive(Parser, Debug)]
#[command(name = "mcp-hub")]
#[command(about = "Aggregating hub that republishes multiple MCP servers as one", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mcp_hub=info".parse().unwrap()),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting mcp-hub");

    let registry = Arc::new(ToolRegistry::new());
    let manager = Arc::new(Manager::new(registry));
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(16);

    // A missing or invalid config file is not fatal: the hub starts empty
    // and the surface still responds.
    let initial_config = match config::load_from_path(&args.config) {
        Ok(cfg) => {
            info!(
                path = %args.config.display(),
                servers = cfg.mcp_servers.len(),
                "configuration loaded"
            );
            manager.load_from_config(&cfg).await;
            Some(cfg)
        }
        Err(e) => {
            warn!(path = %args.config.display(), "failed to load config: {}", e);
            warn!("starting with no MCP servers configured");
            None
        }
    };

    let watcher_handle = initial_config.map(|cfg| {
        let watcher = ConfigWatcher::new(
            args.config.clone(),
            manager.clone(),
            cfg,
            shutdown_tx.subscribe(),
        );
        tokio::spawn(watcher.run())
    });

    let addr = web::listen_addr()?;
    let (bound, serve) = web::bind(addr, manager.clone(), shutdown_tx.subscribe())?;
    info!(addr = %bound, "mcp-hub listening");
    let server_handle = tokio::spawn(serve);

    shutdown_signal().await;
    info!("shutting down");

    let _ = shutdown_tx.send(());
    if let Err(e) = server_handle.await {
        error!("http server task failed: {}", e);
    }
    if let Some(handle) = watcher_handle {
        let _ = handle.await;
    }

    // Sessions close concurrently, bounded by the manager's shutdown grace.
    manager.stop_all().await;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C signal");
        },
        _ = terminate => {
            info!("received terminate signal");
        },
    }
}
