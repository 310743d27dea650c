// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::num::ParseIntError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The main error enum, representing all possible failures within the server.
///
/// The `Display` text of the protocol variants is exactly what follows `ERROR: `
/// on the wire, so keep those messages short and single-line.
#[derive(Error, Debug)]
pub enum CmmdError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: Arc<std::io::Error>,
    },

    #[error("Unknown command")]
    UnknownCommand,

    #[error("Invalid RUN_CMM command")]
    InvalidRunCommand,

    #[error("Invalid count")]
    InvalidCount,

    #[error("count {requested} exceeds limit of {limit}")]
    CountLimitExceeded { requested: u64, limit: u32 },

    #[error("line too long")]
    LineTooLong,

    #[error("max number of clients reached")]
    MaxClientsReached,

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("controller busy")]
    SlotBusy,

    #[error("timed out after {0:?} waiting for controller")]
    SlotAcquireTimeout(Duration),

    #[error("session {0} already holds the controller")]
    SlotReentrant(u64),

    #[error("session {caller} released a controller slot held by {holder:?}")]
    SlotNotOwner { caller: u64, holder: Option<u64> },

    #[error("{0}")]
    OperationFault(String),

    #[error("Timeout: script did not complete within {0:?}")]
    RunTimeout(Duration),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for CmmdError {
    fn clone(&self) -> Self {
        match self {
            CmmdError::Io(e) => CmmdError::Io(Arc::clone(e)),
            CmmdError::Bind { addr, source } => CmmdError::Bind {
                addr: addr.clone(),
                source: Arc::clone(source),
            },
            CmmdError::UnknownCommand => CmmdError::UnknownCommand,
            CmmdError::InvalidRunCommand => CmmdError::InvalidRunCommand,
            CmmdError::InvalidCount => CmmdError::InvalidCount,
            CmmdError::CountLimitExceeded { requested, limit } => CmmdError::CountLimitExceeded {
                requested: *requested,
                limit: *limit,
            },
            CmmdError::LineTooLong => CmmdError::LineTooLong,
            CmmdError::MaxClientsReached => CmmdError::MaxClientsReached,
            CmmdError::ShuttingDown => CmmdError::ShuttingDown,
            CmmdError::SlotBusy => CmmdError::SlotBusy,
            CmmdError::SlotAcquireTimeout(d) => CmmdError::SlotAcquireTimeout(*d),
            CmmdError::SlotReentrant(id) => CmmdError::SlotReentrant(*id),
            CmmdError::SlotNotOwner { caller, holder } => CmmdError::SlotNotOwner {
                caller: *caller,
                holder: *holder,
            },
            CmmdError::OperationFault(s) => CmmdError::OperationFault(s.clone()),
            CmmdError::RunTimeout(d) => CmmdError::RunTimeout(*d),
        }
    }
}

impl PartialEq for CmmdError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CmmdError::Io(e1), CmmdError::Io(e2)) => e1.to_string() == e2.to_string(),
            (CmmdError::OperationFault(s1), CmmdError::OperationFault(s2)) => s1 == s2,
            (CmmdError::SlotAcquireTimeout(d1), CmmdError::SlotAcquireTimeout(d2)) => d1 == d2,
            (CmmdError::RunTimeout(d1), CmmdError::RunTimeout(d2)) => d1 == d2,
            (CmmdError::SlotReentrant(a), CmmdError::SlotReentrant(b)) => a == b,
            (
                CmmdError::SlotNotOwner {
                    caller: c1,
                    holder: h1,
                },
                CmmdError::SlotNotOwner {
                    caller: c2,
                    holder: h2,
                },
            ) => c1 == c2 && h1 == h2,
            (
                CmmdError::CountLimitExceeded {
                    requested: r1,
                    limit: l1,
                },
                CmmdError::CountLimitExceeded {
                    requested: r2,
                    limit: l2,
                },
            ) => r1 == r2 && l1 == l2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl CmmdError {
    /// Protocol errors are answered with an `ERROR:` line and leave the connection open.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            CmmdError::UnknownCommand
                | CmmdError::InvalidRunCommand
                | CmmdError::InvalidCount
                | CmmdError::CountLimitExceeded { .. }
        )
    }

    /// True for transport errors that merely mean the peer went away.
    pub fn is_normal_disconnect(&self) -> bool {
        matches!(self, CmmdError::Io(arc_err) if matches!(
            arc_err.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionAborted
        ))
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for CmmdError {
    fn from(e: std::io::Error) -> Self {
        CmmdError::Io(Arc::new(e))
    }
}

impl From<ParseIntError> for CmmdError {
    fn from(_: ParseIntError) -> Self {
        CmmdError::InvalidCount
    }
}
