// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client connection.

use super::guard::ConnectionGuard;
use super::session::SessionState;
use crate::core::protocol::{LineCodec, Reply};
use crate::core::slot::SlotState;
use crate::core::state::ServerState;
use crate::core::{CmmdError, Command, executor, metrics};
use futures::{FutureExt, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// The next step for the connection's main loop to take.
enum NextAction {
    Continue,
    ExitLoop,
}

/// How a `RUN_CMM` command ended.
enum RunOutcome {
    Completed,
    /// The client can no longer be written to.
    ClientGone,
    /// The server is stopping; the report was terminated early.
    Stopped,
}

/// Manages the full lifecycle of a client connection.
///
/// Lines are handled strictly one at a time: the next line is not read until
/// the reply to the previous one has been flushed.
pub struct ConnectionHandler {
    framed: Framed<TcpStream, LineCodec>,
    addr: SocketAddr,
    state: Arc<ServerState>,
    session_id: u64,
    shutdown_rx: broadcast::Receiver<()>,
    session: SessionState,
}

impl ConnectionHandler {
    /// Creates a new `ConnectionHandler`.
    pub fn new(
        socket: TcpStream,
        addr: SocketAddr,
        state: Arc<ServerState>,
        session_id: u64,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let codec = LineCodec::new(state.config.max_line_length);
        Self {
            framed: Framed::new(socket, codec),
            addr,
            state,
            session_id,
            shutdown_rx,
            session: SessionState::new(),
        }
    }

    /// The main event loop for the connection, handling incoming lines and signals.
    pub async fn run(&mut self) -> Result<(), CmmdError> {
        let _guard = ConnectionGuard::new(self.state.clone(), self.session_id, self.addr);
        let idle_timeout = self.state.config.idle_timeout;

        loop {
            let idle_deadline = self.session.idle_deadline(idle_timeout);

            tokio::select! {
                // Prioritize shutdown signals over other events.
                biased;
                _ = self.shutdown_rx.recv() => {
                    info!("Connection handler for {} received shutdown signal.", self.addr);
                    let _ = self.framed.send(Reply::Error(CmmdError::ShuttingDown.to_string())).await;
                    break;
                }
                _ = sleep_until_deadline(idle_deadline) => {
                    info!("Closing connection {}: idle for {:?}.", self.addr, idle_timeout.unwrap_or_default());
                    break;
                }
                result = self.framed.next() => {
                    match result {
                        Some(Ok(line)) => {
                            debug!("Session {}: Received line: {:?}", self.session_id, line);
                            match self.process_line(line).await {
                                Ok(NextAction::Continue) => {}
                                Ok(NextAction::ExitLoop) => break,
                                Err(e) if e.is_normal_disconnect() => {
                                    debug!("Connection from {} closed while replying: {}", self.addr, e);
                                    break;
                                }
                                Err(e) => {
                                    warn!("Connection error for {}: {}", self.addr, e);
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            if e.is_normal_disconnect() {
                                debug!("Connection from {} closed by peer: {}", self.addr, e);
                            } else if let CmmdError::LineTooLong = e {
                                warn!("Closing connection {}: line longer than {} bytes.", self.addr, self.framed.codec().max_line_length());
                                let _ = self.framed.send(Reply::Error(e.to_string())).await;
                            } else {
                                warn!("Connection error for {}: {}", self.addr, e);
                            }
                            break;
                        }
                        None => {
                            debug!("Connection from {} closed by peer.", self.addr);
                            break;
                        }
                    }
                }
            }
        }

        self.session.is_open = false;
        debug!(
            "Session {}: closed after {} commands.",
            self.session_id, self.session.commands_processed
        );
        Ok(())
    }

    /// Parses one line, executes it, and sends the reply.
    async fn process_line(&mut self, line: String) -> Result<NextAction, CmmdError> {
        self.session.touch();
        if line.is_empty() {
            return Ok(NextAction::Continue);
        }

        self.session.commands_processed += 1;
        self.state.stats.increment_total_commands();
        metrics::COMMANDS_PROCESSED_TOTAL.inc();
        self.update_client_last_activity();

        let reply = match Command::try_from(line.as_str()) {
            Ok(Command::Ping) => Reply::Pong,
            Ok(Command::RunScript { path, repeat_count }) => {
                let limit = self.state.config.max_repeat;
                if repeat_count > limit {
                    Reply::Error(
                        CmmdError::CountLimitExceeded {
                            requested: u64::from(repeat_count),
                            limit,
                        }
                        .to_string(),
                    )
                } else {
                    self.set_client_in_run(true);
                    let outcome = self.run_script(&path, repeat_count).await;
                    self.set_client_in_run(false);
                    self.session.touch();
                    return match outcome? {
                        RunOutcome::Completed => Ok(NextAction::Continue),
                        RunOutcome::ClientGone => Ok(NextAction::ExitLoop),
                        RunOutcome::Stopped => {
                            let notice = Reply::Error(CmmdError::ShuttingDown.to_string());
                            self.framed.send(notice).await?;
                            Ok(NextAction::ExitLoop)
                        }
                    };
                }
            }
            Ok(Command::Unknown { raw }) => {
                debug!("Session {}: Unknown command {:?}", self.session_id, raw);
                Reply::Error(CmmdError::UnknownCommand.to_string())
            }
            Err(e) => {
                debug!("Session {}: Rejected line: {}", self.session_id, e);
                Reply::Error(e.to_string())
            }
        };

        debug!("Session {}: Sending reply: {:?}", self.session_id, reply);
        self.framed.send(reply).await?;
        Ok(NextAction::Continue)
    }

    /// Runs `path` `repeat_count` times, writing each result line as soon as
    /// its iteration finishes and the sentinel after the last one.
    ///
    /// An iteration that holds the controller always runs to completion. The
    /// remaining ones are skipped when the client can no longer be written to
    /// or the server is stopping; in the latter case the report is still
    /// terminated so the client sees where it was cut short.
    async fn run_script(
        &mut self,
        path: &str,
        repeat_count: u32,
    ) -> Result<RunOutcome, CmmdError> {
        info!(
            "Session {}: running '{}' x{}",
            self.session_id, path, repeat_count
        );
        let state = Arc::clone(&self.state);
        let session_id = self.session_id;

        for index in 1..=repeat_count {
            if index > 1 && self.peer_reset() {
                info!(
                    "Session {}: client left after {} of {} iterations of '{}'; skipping the rest.",
                    session_id,
                    index - 1,
                    repeat_count,
                    path
                );
                return Ok(RunOutcome::ClientGone);
            }

            let iteration = executor::run_iteration(&state, session_id, path, index);
            tokio::pin!(iteration);
            let mut stopping = false;
            let line = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    if !self.holds_live_run() {
                        info!(
                            "Session {}: server stopping; '{}' cut short after {} of {} iterations.",
                            session_id, path, index - 1, repeat_count
                        );
                        self.framed.send(Reply::EndOfReport).await?;
                        return Ok(RunOutcome::Stopped);
                    }
                    stopping = true;
                    iteration.await
                }
                line = &mut iteration => line,
            };

            if let Err(e) = self.framed.send(Reply::Line(line)).await {
                if e.is_normal_disconnect() {
                    info!(
                        "Session {}: client left during iteration {} of {} of '{}'; skipping the rest.",
                        session_id, index, repeat_count, path
                    );
                    return Ok(RunOutcome::ClientGone);
                }
                return Err(e);
            }

            if stopping {
                info!(
                    "Session {}: server stopping; '{}' cut short after {} of {} iterations.",
                    session_id, path, index, repeat_count
                );
                self.framed.send(Reply::EndOfReport).await?;
                return Ok(RunOutcome::Stopped);
            }
        }

        self.framed.send(Reply::EndOfReport).await?;
        Ok(RunOutcome::Completed)
    }

    /// Non-blocking check for a connection reset by the peer.
    ///
    /// An orderly EOF only closes the client's sending side, so it does not
    /// count: a half-closed client still gets its report, and a fully closed
    /// one is caught by the next failed write.
    fn peer_reset(&self) -> bool {
        let mut buf = [0u8; 1];
        matches!(
            self.framed.get_ref().peek(&mut buf).now_or_never(),
            Some(Err(_))
        )
    }

    /// True while this session's current iteration holds the controller.
    fn holds_live_run(&self) -> bool {
        matches!(
            self.state.slot.state(),
            SlotState::Busy { owner, abandoned: false, .. } if owner == self.session_id
        )
    }

    /// Updates the client's last activity time in the registry.
    fn update_client_last_activity(&self) {
        if let Some(entry) = self.state.clients.get(&self.session_id) {
            entry.value().lock().last_command_time = Instant::now();
        }
    }

    fn set_client_in_run(&self, in_run: bool) {
        if let Some(entry) = self.state.clients.get(&self.session_id) {
            entry.value().lock().in_run = in_run;
        }
    }
}

/// Sleeps until `deadline`, or forever if there is none.
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
