//! Error types for AirGhost

use crate::AttackKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for AirGhost operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for AirGhost
#[derive(Error, Debug)]
pub enum Error {
    /// A required attack parameter is absent
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    /// Invalid parameter error
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Start requested for a kind that already has an active instance
    #[error("Attack already running: {0}")]
    AlreadyRunning(AttackKind),

    /// Stop requested for a kind with no active instance
    #[error("Attack not running: {0}")]
    NotRunning(AttackKind),

    /// Interface did not end up in the requested mode
    #[error("Interface '{interface}' transition failed: {reason}")]
    InterfaceTransition { interface: String, reason: String },

    /// Daemon configuration could not be written
    #[error("Failed to write config {}: {source}", path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Process exited during the grace window
    #[error("{kind} process exited during startup: {stderr}")]
    ProcessCrashedEarly { kind: AttackKind, stderr: String },

    /// A later step of a composite attack failed after an earlier step
    /// already left a process running
    #[error("{kind} partially started ({running} still running): {reason}")]
    PartialCompositeFailure {
        kind: AttackKind,
        running: AttackKind,
        reason: String,
    },

    /// Program could not be spawned
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Command did not finish within the configured timeout
    #[error("Command '{program}' timed out")]
    CommandTimeout { program: String },

    /// Process control error (signal delivery, wait failure)
    #[error("Process error: {0}")]
    Process(String),

    /// Settings could not be loaded or are malformed
    #[error("Settings error: {0}")]
    Settings(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a missing parameter error
    pub fn missing<S: Into<String>>(name: S) -> Self {
        Error::MissingParameter(name.into())
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Error::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a process control error with a custom message
    pub fn process<S: Into<String>>(msg: S) -> Self {
        Error::Process(msg.into())
    }
}
