// src/connection/mod.rs

//! Manages the lifecycle of a single client TCP connection, including line
//! framing, command dispatch, and session state management.

mod guard;
mod handler;
mod session;

pub use guard::ConnectionGuard;
pub use handler::ConnectionHandler;
pub use session::SessionState;
