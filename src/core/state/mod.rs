// src/core/state/mod.rs

//! Defines the central `ServerState` struct and all related state components.

mod client;
mod core;
mod stats;

pub use client::*;
pub use core::{ServerPhase, ServerState, ServerStatus};
pub use stats::StatsState;
