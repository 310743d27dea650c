// src/core/executor.rs

//! Drives one script iteration through the controller: acquire the slot,
//! run the operation on the blocking pool, turn the outcome into a result line.

use crate::core::metrics;
use crate::core::protocol::ResultLine;
use crate::core::runner::RunResult;
use crate::core::slot::SlotGuard;
use crate::core::state::ServerState;
use crate::core::CmmdError;
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Runs iteration `index` of `path` on behalf of `session_id`.
///
/// Never fails: every problem (slot unavailable, runner fault, timeout) is
/// reported as a `FAIL` line so the client always gets one line per iteration.
pub async fn run_iteration(
    state: &Arc<ServerState>,
    session_id: u64,
    path: &str,
    index: u32,
) -> ResultLine {
    state.stats.increment_total_runs();
    let session_config = &state.config.session;

    let outcome = match state
        .slot
        .acquire(session_id, session_config.acquire_timeout)
        .await
    {
        Ok(guard) => execute(state, guard, path, session_config.run_timeout).await,
        Err(e) => {
            warn!(
                "Session {}: could not acquire the controller for '{}' [{}]: {}",
                session_id, path, index, e
            );
            Err(e)
        }
    };

    let line = state.verdict.result_line(index, outcome);
    metrics::RUNS_TOTAL
        .with_label_values(&[line.tag.as_str()])
        .inc();
    info!("Session {}: '{}' {}", session_id, path, line);
    line
}

/// Executes the operation while holding `guard`.
///
/// The guard moves into the blocking task and is dropped when the runner
/// returns, not when this function returns. If `run_timeout` elapses first the
/// run is marked abandoned and reported as a timeout; the controller stays
/// reserved until the runner call actually finishes, because that call cannot
/// be interrupted.
async fn execute(
    state: &Arc<ServerState>,
    guard: SlotGuard,
    path: &str,
    run_timeout: Duration,
) -> Result<RunResult, CmmdError> {
    let owner = guard.owner();
    let runner = Arc::clone(&state.runner);
    let script = path.to_string();

    let mut task = tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        let outcome = runner.run_operation(&script);
        metrics::RUN_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
        debug!("Operation '{}' returned after {:?}", script, started.elapsed());
        drop(guard);
        outcome
    });

    match tokio::time::timeout(run_timeout, &mut task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_err)) => {
            // The guard was dropped while unwinding, so the slot is already free.
            let reason = if join_err.is_panic() {
                panic_message(join_err.into_panic())
            } else {
                join_err.to_string()
            };
            warn!("Runner for '{}' crashed: {}", path, reason);
            Err(CmmdError::OperationFault(format!("runner crashed: {reason}")))
        }
        Err(_) => {
            state.slot.mark_abandoned(owner);
            Err(CmmdError::RunTimeout(run_timeout))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
