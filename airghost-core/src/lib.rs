//! AirGhost Core Library
//!
//! This crate provides the shared types, error handling, settings and the
//! command-execution seam used by the AirGhost attack orchestration crates.

pub mod attack;
pub mod command;
pub mod error;
pub mod parameter;
pub mod settings;
pub mod types;

// Re-export commonly used types
pub use attack::{AttackKind, AttackState};
pub use command::{CommandOutput, CommandRunner, CommandSpec, ProcessHandle, SystemRunner};
pub use error::{Error, Result};
pub use parameter::AttackParameters;
pub use settings::{RollbackPolicy, Settings};
pub use types::*;
