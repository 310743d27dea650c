// src/core/runner/mod.rs

//! The boundary to the instrument controller.
//!
//! An `OperationRunner` executes one script against the controller and blocks
//! until it reaches a terminal state. The server never calls a runner from
//! more than one thread at a time: every call is made by the current holder
//! of the `SessionSlot`, on tokio's blocking pool.

mod dry_run;
mod process;

pub use dry_run::DryRunRunner;
pub use process::{ProcessRunner, SCRIPT_PLACEHOLDER, normalize_script_path};

use crate::config::{RunnerConfig, RunnerKind};
use crate::core::CmmdError;
use std::sync::Arc;

/// Terminal status of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failure,
}

/// The outcome of one operation invocation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub status: RunStatus,
    /// A human-readable summary. May be empty, in which case the raw messages
    /// are reported instead.
    pub message: String,
    /// Where the controller left a log for this run, if anywhere.
    pub log_ref: Option<String>,
    /// Every message the controller emitted during the run, in order.
    pub raw_messages: Vec<String>,
}

impl RunResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Success,
            message: message.into(),
            log_ref: None,
            raw_messages: Vec::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failure,
            message: message.into(),
            log_ref: None,
            raw_messages: Vec::new(),
        }
    }

    pub fn with_raw_messages(mut self, raw_messages: Vec<String>) -> Self {
        self.raw_messages = raw_messages;
        self
    }

    pub fn with_log_ref(mut self, log_ref: impl Into<String>) -> Self {
        self.log_ref = Some(log_ref.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Executes one script against the controller.
///
/// Implementations may block for a long, variable time and are not expected to
/// be interruptible. Returning `Err` signals an internal fault (the controller
/// connection dropped, the driver could not be loaded, ...); the server turns
/// it into a `FAIL` line carrying the error's message.
pub trait OperationRunner: Send + Sync + 'static {
    fn run_operation(&self, script: &str) -> Result<RunResult, CmmdError>;
}

impl<F> OperationRunner for F
where
    F: Fn(&str) -> Result<RunResult, CmmdError> + Send + Sync + 'static,
{
    fn run_operation(&self, script: &str) -> Result<RunResult, CmmdError> {
        self(script)
    }
}

/// Builds the runner selected by the configuration.
pub fn from_config(config: &RunnerConfig) -> Arc<dyn OperationRunner> {
    match config.kind {
        RunnerKind::DryRun => Arc::new(DryRunRunner::new(config.dry_run_delay)),
        RunnerKind::Process => Arc::new(ProcessRunner::new(
            config.program.clone(),
            config.args.clone(),
        )),
    }
}
