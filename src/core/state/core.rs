// src/core/state/core.rs

//! Defines the central `ServerState` struct, holding all shared server-wide state.

use super::client::ClientMap;
use super::stats::StatsState;
use crate::config::Config;
use crate::core::metrics;
use crate::core::runner::OperationRunner;
use crate::core::slot::SessionSlot;
use crate::core::verdict::Verdict;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Whether the listener is accepting connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Listening,
    Stopped,
}

/// The observable, process-wide server status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStatus {
    pub phase: ServerPhase,
    pub connected_clients: usize,
}

impl ServerStatus {
    /// True if at least one client is connected.
    pub fn any_client_connected(&self) -> bool {
        self.connected_clients > 0
    }
}

/// The central struct holding all shared, server-wide state.
///
/// This struct is wrapped in an `Arc` and passed to the listener and every
/// connection handler. Besides the immutable configuration, the only state
/// shared between handlers is the controller slot and the client registry.
pub struct ServerState {
    /// The configuration loaded at startup.
    pub config: Arc<Config>,
    /// The gate in front of the controller.
    pub slot: SessionSlot,
    /// The boundary to the controller.
    pub runner: Arc<dyn OperationRunner>,
    /// Failure-keyword rules applied to every run result.
    pub verdict: Verdict,
    /// All connected clients, keyed by session id.
    pub clients: ClientMap,
    /// Monotonic counters.
    pub stats: StatsState,
    status_tx: watch::Sender<ServerStatus>,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("config", &self.config)
            .field("slot", &self.slot.state())
            .field("clients", &self.clients.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl ServerState {
    /// Creates the shared state for a server that has not started listening yet.
    pub fn new(config: Config, runner: Arc<dyn OperationRunner>) -> Arc<Self> {
        let slot = SessionSlot::new(config.session.policy);
        let verdict = Verdict::new(&config.runner.fail_keywords);
        let (status_tx, _) = watch::channel(ServerStatus {
            phase: ServerPhase::Stopped,
            connected_clients: 0,
        });
        Arc::new(Self {
            config: Arc::new(config),
            slot,
            runner,
            verdict,
            clients: Arc::new(DashMap::new()),
            stats: StatsState::new(),
            status_tx,
        })
    }

    /// Subscribes to connect/disconnect and listener start/stop notifications.
    pub fn subscribe_status(&self) -> watch::Receiver<ServerStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> ServerStatus {
        *self.status_tx.borrow()
    }

    pub fn set_phase(&self, phase: ServerPhase) {
        metrics::LISTENING.set(if phase == ServerPhase::Listening {
            1.0
        } else {
            0.0
        });
        self.status_tx.send_modify(|status| status.phase = phase);
    }

    /// Re-publishes the connected client count after the registry changed.
    pub fn publish_client_count(&self) {
        let count = self.clients.len();
        metrics::CONNECTED_CLIENTS.set(count as f64);
        self.status_tx.send_if_modified(|status| {
            if status.connected_clients == count {
                return false;
            }
            debug!(
                "Connected clients: {} -> {}",
                status.connected_clients, count
            );
            status.connected_clients = count;
            true
        });
    }
}
