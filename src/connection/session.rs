// src/connection/session.rs

//! Defines the state associated with a single client session.

use std::time::{Duration, Instant};

/// Holds the state specific to a single client connection.
#[derive(Debug)]
pub struct SessionState {
    /// When the last line (of any kind) was received.
    pub last_activity: Instant,
    /// False once the handler has decided to close the connection.
    pub is_open: bool,
    /// Non-blank lines processed on this connection.
    pub commands_processed: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            last_activity: Instant::now(),
            is_open: true,
            commands_processed: 0,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// The instant at which this session counts as idle, if an idle timeout is set.
    pub fn idle_deadline(&self, idle_timeout: Option<Duration>) -> Option<Instant> {
        idle_timeout.map(|timeout| self.last_activity + timeout)
    }
}
