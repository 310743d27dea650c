// src/server/mod.rs

use crate::config::Config;
use crate::core::CmmdError;
use crate::core::runner::{self, OperationRunner};
use crate::core::state::{ServerState, ServerStatus};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

/// A running server. Dropping the handle without calling `stop` also stops
/// the accept loop, but does not wait for it.
pub struct ServerHandle {
    state: Arc<ServerState>,
    local_addr: SocketAddr,
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The address the listener is actually bound to (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Subscribes to phase and connected-client notifications.
    pub fn subscribe_status(&self) -> watch::Receiver<ServerStatus> {
        self.state.subscribe_status()
    }

    /// Stops accepting, signals every handler to close and returns once the
    /// listening socket has been released.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            error!("Server task ended abnormally: {e:?}");
        }
    }
}

/// Binds the listener and starts accepting connections in the background.
pub async fn start(
    config: Config,
    runner: Arc<dyn OperationRunner>,
) -> Result<ServerHandle, CmmdError> {
    // 1. Initialize server state and bind the listener.
    let mut server_context = initialization::setup(config, runner).await?;
    let local_addr = server_context.listener.local_addr()?;
    let state = server_context.state.clone();

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context);

    // 3. Start the main connection acceptance loop.
    let (stop_tx, stop_rx) = oneshot::channel();
    let task = tokio::spawn(connection_loop::run(server_context, stop_rx));

    Ok(ServerHandle {
        state,
        local_addr,
        stop_tx: Some(stop_tx),
        task,
    })
}

/// The binary's entry point: starts the server and stops it on SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let runner = runner::from_config(&config.runner);
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    let handle = start(config, runner).await?;

    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
        _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
    }

    handle.stop().await;
    Ok(())
}
