// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use crate::core::state::{ClientInfo, ServerState};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// An RAII guard to ensure connection resources are always cleaned up when a
/// connection handler's scope is exited.
pub struct ConnectionGuard {
    /// A shared reference to the server state.
    pub(crate) state: Arc<ServerState>,
    /// The unique identifier for the client session.
    pub(crate) session_id: u64,
    /// The network address of the client.
    pub(crate) addr: SocketAddr,
}

impl ConnectionGuard {
    /// Registers the client and publishes the new connected count.
    pub(crate) fn new(state: Arc<ServerState>, session_id: u64, addr: SocketAddr) -> Self {
        state.clients.insert(
            session_id,
            Arc::new(Mutex::new(ClientInfo::new(addr, session_id))),
        );
        state.publish_client_count();
        Self {
            state,
            session_id,
            addr,
        }
    }
}

impl Drop for ConnectionGuard {
    /// Removes the client from the registry and publishes the new connected count.
    /// A controller slot held on behalf of this client is not touched here: it
    /// belongs to the in-flight operation and is freed when that returns.
    fn drop(&mut self) {
        debug!(
            "ConnectionGuard dropping, cleaning up resources for connection {}",
            self.addr
        );

        if self.state.clients.remove(&self.session_id).is_none() {
            debug!(
                "Client {} was not in the client registry upon cleanup.",
                self.addr
            );
        }
        self.state.publish_client_count();
    }
}
