//! Embergate Game Server
//!
//! Accepts game clients over TCP, runs the key exchange and dispatches their
//! messages through the partitioned processors.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use embergate_server::config::ServerConfig;
use embergate_server::logging::init_logging;
use embergate_server::net::TcpServerListener;
use embergate_server::state::ServerState;
use embergate_server::{GameServer, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before logging so its settings apply
    let config = ServerConfig::load().await?;
    init_logging(&config.logging)?;

    info!("╔══════════════════════════════════════════════╗");
    info!("║        Embergate Game Server v{}             ║", VERSION);
    info!("╚══════════════════════════════════════════════╝");
    info!(
        "Configuration loaded from: {}",
        config.config_path.display()
    );

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let state = Arc::new(ServerState::new(config.clone(), shutdown_tx.clone()));
    state.start();
    info!("Application state initialized");

    let game_addr = config.game_address();
    let game_listener = TcpListener::bind(&game_addr).await?;
    info!("Game server listening on: {}", game_addr);

    let server = Arc::new(GameServer::new(state.clone()));
    let listener = Arc::new(TcpServerListener::new(
        server,
        config.listener_options(),
        shutdown_tx.clone(),
    ));
    let game_handle = tokio::spawn(listener.clone().run(game_listener));

    info!("Server startup complete!");
    info!("{} is ready for connections", config.server_name);

    // Wait for shutdown signal
    wait_for_shutdown(shutdown_tx.clone()).await;

    info!("Shutting down server...");

    if let Err(e) = game_handle.await {
        error!("Game acceptor terminated abnormally: {}", e);
    }

    // Cleanup
    listener.disconnect_all();
    if !listener.wait_idle(Duration::from_secs(5)).await {
        warn!(
            remaining = listener.connection_count(),
            "Connections still open after shutdown timeout"
        );
    }
    info!(
        online = state.roles.count(),
        "All connections disconnected"
    );
    state.shutdown().await;

    info!("Server shutdown complete. Goodbye!");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Signal all tasks to shut down
    let _ = shutdown_tx.send(());
}
