//! CLI subcommand implementations.

pub mod common;
pub mod info;
pub mod play;
pub mod render;
