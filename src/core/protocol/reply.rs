// src/core/protocol/reply.rs

//! Server-to-client replies and their exact wire encoding.

use bytes::BytesMut;
use std::fmt;

/// The line that terminates every `RUN_CMM` report.
pub const SENTINEL: &str = "<<EOT>>";

/// Separator used when a multi-line message is folded onto one result line.
const FOLD_SEPARATOR: &str = " | ";

/// The outcome tag carried by each result line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTag {
    Pass,
    Fail,
}

impl StatusTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusTag::Pass => "PASS",
            StatusTag::Fail => "FAIL",
        }
    }
}

impl fmt::Display for StatusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `[<index>] <TAG>:<message>` line of a run report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLine {
    /// 1-based iteration index.
    pub index: u32,
    pub tag: StatusTag,
    pub message: String,
}

impl ResultLine {
    pub fn new(index: u32, tag: StatusTag, message: impl AsRef<str>) -> Self {
        Self {
            index,
            tag,
            message: fold_lines(message.as_ref()),
        }
    }
}

impl fmt::Display for ResultLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}:{}", self.index, self.tag, self.message)
    }
}

/// One unit written back to the client.
///
/// A run report is sent as one `Line` per iteration, as each completes,
/// followed by `EndOfReport`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `PONG`
    Pong,
    /// One result line of a run report.
    Line(ResultLine),
    /// The sentinel closing a run report.
    EndOfReport,
    /// `ERROR: <reason>`
    Error(String),
}

impl Reply {
    /// Appends the wire form of this reply to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        match self {
            Reply::Pong => dst.extend_from_slice(b"PONG\n"),
            Reply::Line(line) => {
                dst.extend_from_slice(line.to_string().as_bytes());
                dst.extend_from_slice(b"\n");
            }
            Reply::EndOfReport => {
                dst.extend_from_slice(SENTINEL.as_bytes());
                dst.extend_from_slice(b"\n");
            }
            Reply::Error(reason) => {
                dst.extend_from_slice(b"ERROR: ");
                dst.extend_from_slice(fold_lines(reason).as_bytes());
                dst.extend_from_slice(b"\n");
            }
        }
    }

    /// Convenience for tests and logging.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.to_vec()
    }
}

/// Collapses line breaks so that a message always occupies a single line.
pub fn fold_lines(message: &str) -> String {
    if !message.contains(['\n', '\r']) {
        return message.to_string();
    }
    message
        .replace('\r', "\n")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(FOLD_SEPARATOR)
}
