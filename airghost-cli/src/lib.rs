//! CLI interface for AirGhost
//!
//! This crate provides the command-line interface for AirGhost: argument
//! parsing and the implementation of each subcommand.

pub mod args;
pub mod commands;

pub use args::{Cli, Commands, InterfaceCommand};
pub use commands::run_command;
