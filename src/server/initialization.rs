// src/server/initialization.rs

//! Handles server initialization: shared state setup and binding the listener.

use super::context::ServerContext;
use crate::config::{Config, RunnerKind};
use crate::core::CmmdError;
use crate::core::runner::OperationRunner;
use crate::core::state::{ServerPhase, ServerState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Initializes all server components before starting the main loop.
///
/// Fails with `CmmdError::Bind` if the address is invalid or already in use.
pub async fn setup(
    config: Config,
    runner: Arc<dyn OperationRunner>,
) -> Result<ServerContext, CmmdError> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(addr.as_str())
        .await
        .map_err(|e| CmmdError::Bind {
            addr: addr.clone(),
            source: Arc::new(e),
        })?;
    let local_addr = listener.local_addr()?;
    let connection_permits = Arc::new(Semaphore::new(config.max_clients));

    let server_state = ServerState::new(config, runner);
    server_state.set_phase(ServerPhase::Listening);
    info!("cmmd listening on {}", local_addr);

    Ok(ServerContext {
        state: server_state,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        connection_permits,
    })
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    match config.runner.kind {
        RunnerKind::DryRun => warn!("Runner is 'dry-run': scripts are NOT sent to the controller."),
        RunnerKind::Process => info!(
            "Runner: '{}' {:?}",
            config.runner.program, config.runner.args
        ),
    }
    info!(
        "Slot policy {:?}, acquire timeout {:?}, run timeout {:?}.",
        config.session.policy, config.session.acquire_timeout, config.session.run_timeout
    );
    match config.idle_timeout {
        Some(timeout) => info!("Idle connections are closed after {:?}.", timeout),
        None => info!("Idle timeout disabled."),
    }
}
