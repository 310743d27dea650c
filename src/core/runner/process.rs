// src/core/runner/process.rs

//! Runs a script by invoking an external command line, typically the vendor's
//! remote-control utility, once per operation.

use super::{OperationRunner, RunResult};
use crate::core::CmmdError;
use std::collections::HashSet;
use std::process::Command;
use tracing::{debug, warn};

/// Placeholder in the argument template that receives the script path.
pub const SCRIPT_PLACEHOLDER: &str = "{script}";

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
}

impl ProcessRunner {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Renders the argument template for one script.
    pub fn render_args(&self, script: &str) -> Vec<String> {
        let script = normalize_script_path(script);
        self.args
            .iter()
            .map(|arg| arg.replace(SCRIPT_PLACEHOLDER, &script))
            .collect()
    }
}

impl OperationRunner for ProcessRunner {
    fn run_operation(&self, script: &str) -> Result<RunResult, CmmdError> {
        let args = self.render_args(script);
        debug!("Spawning {} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| {
                CmmdError::OperationFault(format!("failed to start '{}': {e}", self.program))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let raw_messages = collect_messages(stdout.lines().chain(stderr.lines()));

        if output.status.success() {
            Ok(RunResult::success(String::new()).with_raw_messages(raw_messages))
        } else {
            warn!("'{}' for '{}' ended with {}", self.program, script, output.status);
            let detail = raw_messages
                .last()
                .cloned()
                .unwrap_or_else(|| "no output".to_string());
            Ok(
                RunResult::failure(format!("{} ({})", detail, output.status))
                    .with_raw_messages(raw_messages),
            )
        }
    }
}

/// Controllers expect forward slashes and choke on embedded quotes.
pub fn normalize_script_path(script: &str) -> String {
    script.replace('\\', "/").replace('"', "")
}

/// Trims, drops empty lines and keeps only the first occurrence of each message.
fn collect_messages<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    lines
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| seen.insert(*l))
        .map(str::to_string)
        .collect()
}
