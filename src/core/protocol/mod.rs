// src/core/protocol/mod.rs

pub mod command;
pub mod line_codec;
pub mod reply;
pub use command::Command;
pub use line_codec::LineCodec;
pub use reply::{Reply, ResultLine, SENTINEL, StatusTag};
