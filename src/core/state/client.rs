// src/core/state/client.rs

//! Contains state definitions related to client connections.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

pub type ClientMap = Arc<DashMap<u64, Arc<Mutex<ClientInfo>>>>;

/// What the server knows about one connected client.
#[derive(Debug)]
pub struct ClientInfo {
    pub addr: SocketAddr,
    pub session_id: u64,
    pub created: Instant,
    pub last_command_time: Instant,
    /// True while the connection is executing a `RUN_CMM` request.
    pub in_run: bool,
}

impl ClientInfo {
    pub fn new(addr: SocketAddr, session_id: u64) -> Self {
        let now = Instant::now();
        Self {
            addr,
            session_id,
            created: now,
            last_command_time: now,
            in_run: false,
        }
    }
}
