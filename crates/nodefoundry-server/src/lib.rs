//! NodeFoundry provisioning server
//!
//! Wires the node store, DHCP engine, boot script generators and status
//! sync behind one HTTP listener.
//!
//! ```text
//!   DHCP ──► StoreRegistry ──┐
//!                            ▼
//!   HTTP API ───────────► NodeStore ◄── StatusSync ◄── POST /agent/{mac}/status
//!      │                     │
//!      └── /boot, /preseed ◄─┘
//! ```

pub mod api;
pub mod config;
pub mod registry;
pub mod services;
pub mod status_sync;
pub mod store;

#[cfg(test)]
pub mod test_helpers;

pub use config::ServerConfig;

use anyhow::Context;
use axum::Router;
use nodefoundry_dhcp::LeasePool;
use nodefoundry_ipxe::{BootScriptGenerator, PreseedGenerator};
use services::ServiceRunner;
use status_sync::{StatusSync, StatusUpdate};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use store::NodeStore;
use tokio::sync::{mpsc, watch};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared state handed to every HTTP handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn NodeStore>,
    pub boot_scripts: Arc<BootScriptGenerator>,
    pub preseed: Arc<PreseedGenerator>,
    /// None when DHCP runs without a pool
    pub pool: Option<Arc<LeasePool>>,
    pub status_tx: mpsc::Sender<StatusUpdate>,
    pub agent_binary: Arc<PathBuf>,
    pub started_at: Instant,
}

/// Full router with request tracing
pub fn app(state: AppState) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the server until `shutdown` flips to true.
pub async fn run(config: ServerConfig, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let store = store::open_store(&config.db_path)
        .with_context(|| format!("failed to open node store at {}", config.db_path.display()))?;
    info!(path = %config.db_path.display(), "Node store opened");

    let pool = match config.pool_config() {
        Some(pool_config) => {
            let pool = LeasePool::new(&pool_config).context("invalid DHCP pool configuration")?;
            info!(start = %pool.start(), end = %pool.end(), "DHCP lease pool configured");
            Some(Arc::new(pool))
        }
        None => None,
    };

    let ipxe_config = config.ipxe_config();
    let boot_scripts = BootScriptGenerator::new(ipxe_config.clone())
        .context("invalid boot script configuration")?;
    let preseed = PreseedGenerator::new(ipxe_config).context("invalid preseed configuration")?;

    let sync = Arc::new(StatusSync::new(store.clone()));
    let (status_tx, sync_task) = sync.spawn(config.status_queue, shutdown.clone());

    let services = ServiceRunner::from_config(&config, store.clone(), pool.clone())
        .start(shutdown.clone());

    let state = AppState {
        store,
        boot_scripts: Arc::new(boot_scripts),
        preseed: Arc::new(preseed),
        pool,
        status_tx,
        agent_binary: Arc::new(config.agent_binary.clone()),
        started_at: Instant::now(),
    };

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", config.http_addr))?;
    info!(
        addr = %config.http_addr,
        advertised = %config.advertised_addr(),
        "HTTP server listening"
    );

    let mut http_shutdown = shutdown.clone();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            while !*http_shutdown.borrow() {
                if http_shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped, waiting for background services");
    services.join().await;
    if let Err(e) = sync_task.await {
        error!(error = %e, "Status sync task failed");
    }

    info!("Shutdown complete");
    Ok(())
}
