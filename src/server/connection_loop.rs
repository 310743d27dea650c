// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use crate::connection::ConnectionHandler;
use crate::core::protocol::{LineCodec, Reply};
use crate::core::state::ServerPhase;
use crate::core::{CmmdError, metrics};
use futures::SinkExt;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tracing::{error, info, warn};

/// How long handlers get to flush their shutdown notice before being aborted.
const HANDLER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The main server loop that accepts connections and handles graceful shutdown.
///
/// Runs until `stop_rx` fires (or its sender is dropped) or a background task
/// fails. The listening socket is closed before this function returns.
pub async fn run(mut ctx: ServerContext, mut stop_rx: oneshot::Receiver<()>) {
    let mut session_id_counter: u64 = 0;
    let mut client_tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => {
                info!("Stop requested, initiating graceful shutdown.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        ctx.state.stats.increment_total_connections();
                        metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

                        let permit = match ctx.connection_permits.clone().try_acquire_owned() {
                            Ok(permit) => permit,
                            Err(_) => {
                                warn!("Rejecting connection from {}: max_clients ({}) reached.", addr, ctx.state.config.max_clients);
                                ctx.state.stats.increment_rejected_connections();
                                client_tasks.spawn(async move {
                                    let mut framed = Framed::new(socket, LineCodec::default());
                                    let _ = framed.send(Reply::Error(CmmdError::MaxClientsReached.to_string())).await;
                                });
                                continue;
                            }
                        };

                        info!("Accepted new connection from: {}", addr);
                        session_id_counter = session_id_counter.wrapping_add(1);
                        let session_id = session_id_counter;
                        let state_clone = ctx.state.clone();
                        let shutdown_rx = ctx.shutdown_tx.subscribe();

                        client_tasks.spawn(async move {
                            let _permit = permit;
                            let mut handler = ConnectionHandler::new(socket, addr, state_clone, session_id, shutdown_rx);
                            if let Err(e) = handler.run().await {
                                warn!("Connection from {} terminated unexpectedly: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res {
                    if e.is_panic() {
                        error!("A client handler panicked: {e:?}");
                    }
                }
            },
        }
    }

    // Release the listening socket before anything else so new clients are refused.
    drop(ctx.listener);
    ctx.state.set_phase(ServerPhase::Stopped);

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        info!("No tasks were subscribed to the shutdown signal.");
    }

    // A handler whose iteration holds the controller finishes it first.
    let grace = ctx.state.config.shutdown_grace;
    let drained = tokio::time::timeout(grace + HANDLER_DRAIN_TIMEOUT, async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Timed out waiting for client handlers; aborting the rest.");
    }
    client_tasks.shutdown().await;
    info!("All client connections closed.");

    if !ctx.state.slot.wait_idle(grace).await {
        warn!(
            "A controller run was still in flight after {:?}; abandoning it.",
            grace
        );
    }

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
}
