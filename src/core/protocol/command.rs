// src/core/protocol/command.rs

//! Parses a single decoded line into a `Command`.

use crate::core::CmmdError;

/// Keyword for the liveness probe.
const PING: &str = "PING";
/// Keyword for a script run request.
const RUN_CMM: &str = "RUN_CMM";
/// Field separator inside a `RUN_CMM` line.
const FIELD_SEPARATOR: char = '|';

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    /// Run `path` `repeat_count` times, one slot acquisition per iteration.
    RunScript { path: String, repeat_count: u32 },
    /// Any line that has no recognised command shape.
    Unknown { raw: String },
}

impl Command {
    /// Returns a short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::RunScript { .. } => "run_cmm",
            Command::Unknown { .. } => "unknown",
        }
    }
}

impl TryFrom<&str> for Command {
    type Error = CmmdError;

    /// Keywords are matched case-insensitively. A line that starts with the
    /// `RUN_CMM` keyword but is otherwise malformed is an error rather than
    /// `Unknown`, so the client learns what was wrong with it.
    fn try_from(line: &str) -> Result<Self, Self::Error> {
        let line = line.trim();
        if line.eq_ignore_ascii_case(PING) {
            return Ok(Command::Ping);
        }

        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        if !fields[0].trim().eq_ignore_ascii_case(RUN_CMM) {
            return Ok(Command::Unknown {
                raw: line.to_string(),
            });
        }

        let [_, path, count] = fields.as_slice() else {
            return Err(CmmdError::InvalidRunCommand);
        };
        let path = path.trim();
        if path.is_empty() {
            return Err(CmmdError::InvalidRunCommand);
        }

        let requested: u64 = count.trim().parse()?;
        if requested == 0 {
            return Err(CmmdError::InvalidCount);
        }
        let repeat_count =
            u32::try_from(requested).map_err(|_| CmmdError::CountLimitExceeded {
                requested,
                limit: u32::MAX,
            })?;

        Ok(Command::RunScript {
            path: path.to_string(),
            repeat_count,
        })
    }
}
