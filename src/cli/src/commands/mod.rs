//! Subcommands of the `stackup` binary.

pub mod config;
pub mod graph;
pub mod up;
