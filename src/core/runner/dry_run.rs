// src/core/runner/dry_run.rs

use super::{OperationRunner, RunResult};
use crate::core::CmmdError;
use std::time::Duration;
use tracing::debug;

/// A runner that never touches a controller. Useful for exercising clients
/// and the protocol on machines without the instrument software.
#[derive(Debug, Clone, Default)]
pub struct DryRunRunner {
    delay: Duration,
}

impl DryRunRunner {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl OperationRunner for DryRunRunner {
    fn run_operation(&self, script: &str) -> Result<RunResult, CmmdError> {
        debug!("Dry run of '{}' ({:?}).", script, self.delay);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(RunResult::success(format!("dry run: {script}")))
    }
}
