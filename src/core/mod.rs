// src/core/mod.rs

//! The central module containing the core logic and data structures of cmmd.

pub mod errors;
pub mod executor;
pub mod metrics;
pub mod protocol;
pub mod runner;
pub mod slot;
pub mod state;
pub mod verdict;

pub use errors::CmmdError;
pub use protocol::Command;
