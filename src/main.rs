// Main binary that starts the provisioning server
use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use nodefoundry_server::{run as run_server, ServerConfig};
use std::io::stderr;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "NodeFoundry bare metal provisioning", long_about = None)]
struct Cli {
    #[command(flatten)]
    server: ServerConfig,

    /// Verbose output - shows more detailed logs
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // Respect RUST_LOG, fall back to verbose/info for our crates
    let level = if cli.verbose { "debug" } else { "info" };
    let default_directives = format!(
        "nodefoundry={level},nodefoundry_server={level},nodefoundry_dhcp={level},nodefoundry_ipxe={level},tower_http=info,hyper=warn,h2=warn,mio=warn",
        level = level
    );
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));
    registry().with(filter).with(fmt::layer().with_writer(stderr)).init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting NodeFoundry");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    run_server(cli.server, shutdown_rx).await.map_err(|e| {
        error!(error = %e, "Server failed");
        eyre!("{:#}", e)
    })
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
