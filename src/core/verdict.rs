// src/core/verdict.rs

//! Turns the outcome of one run into the status tag and message reported to the client.
//!
//! A controller can report a script as completed even though the script itself
//! printed a failure. The configured failure keywords catch those runs.

use crate::core::CmmdError;
use crate::core::protocol::{ResultLine, StatusTag};
use crate::core::runner::{RunResult, RunStatus};

/// Keywords that mark a run as failed when they appear in any controller message.
pub const DEFAULT_FAIL_KEYWORDS: &[&str] = &[
    "teststepfail",
    "[fail]",
    "test failed",
    "aborting test",
    "execution failed",
];

#[derive(Debug, Clone)]
pub struct Verdict {
    /// Lowercased keywords.
    keywords: Vec<String>,
}

impl Default for Verdict {
    fn default() -> Self {
        Self::new(DEFAULT_FAIL_KEYWORDS.iter().copied())
    }
}

impl Verdict {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Returns the first raw message containing a failure keyword, if any.
    pub fn find_failure<'a>(&self, result: &'a RunResult) -> Option<&'a str> {
        result
            .raw_messages
            .iter()
            .chain(std::iter::once(&result.message))
            .find(|msg| {
                let lower = msg.to_lowercase();
                self.keywords.iter().any(|k| lower.contains(k.as_str()))
            })
            .map(String::as_str)
    }

    /// Downgrades a successful result whose messages contain a failure keyword.
    pub fn judge(&self, result: RunResult) -> RunResult {
        if result.status == RunStatus::Success
            && let Some(offending) = self.find_failure(&result)
        {
            let message = format!("failure reported: {offending}");
            return RunResult {
                status: RunStatus::Failure,
                message,
                ..result
            };
        }
        result
    }

    /// Produces the result line for iteration `index` from a runner outcome.
    pub fn result_line(&self, index: u32, outcome: Result<RunResult, CmmdError>) -> ResultLine {
        match outcome {
            Ok(result) => {
                let result = self.judge(result);
                let tag = match result.status {
                    RunStatus::Success => StatusTag::Pass,
                    RunStatus::Failure => StatusTag::Fail,
                };
                ResultLine::new(index, tag, display_message(&result))
            }
            Err(e) => ResultLine::new(index, StatusTag::Fail, e.to_string()),
        }
    }
}

/// The runner's message, or its raw messages when it gave no summary.
fn display_message(result: &RunResult) -> String {
    if result.message.trim().is_empty() {
        result.raw_messages.join("\n")
    } else {
        result.message.clone()
    }
}
