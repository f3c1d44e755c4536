//! Error types for process lifecycle and pipe I/O

use std::io;
use thiserror::Error;

/// Errors produced by configuration, spawning, and pipe I/O.
///
/// Timeouts are deliberately not represented here: an exhausted read budget
/// yields "no data" and an exhausted write budget yields a short byte count,
/// both ordinary results.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// No command was configured before `run()` was attempted.
    #[error("no command configured")]
    MissingCommand,

    /// A configuration value was rejected.
    #[error("invalid process configuration: {0}")]
    InvalidConfig(String),

    /// A configuration mutator was called after the process started.
    #[error("process already started")]
    AlreadyStarted,

    /// An I/O or status operation was requested before the process started.
    #[error("process not started")]
    NotStarted,

    /// The OS refused or failed to create the child process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(#[source] io::Error),

    /// A pipe operation failed.
    #[error("pipe I/O failed: {0}")]
    Io(#[source] io::Error),
}

/// Result type for process operations.
pub type Result<T> = std::result::Result<T, ProcessError>;
