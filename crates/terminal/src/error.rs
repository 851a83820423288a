//! Error types for the terminal crate.

use std::time::Duration;

use thiserror::Error;

/// Terminal error type covering every failure a session can surface.
#[derive(Debug, Error)]
pub enum TerminalError {
    /// Allocating the PTY, spawning the shell, or verifying it failed.
    #[error("failed to start terminal: {0}")]
    Startup(String),

    /// The reconnect budget is exhausted and no live session is available.
    #[error("failed to establish terminal connection")]
    Connection,

    /// No output at all arrived within the command timeout.
    #[error("command execution timeout ({}s) with no data received", timeout.as_secs_f64())]
    Timeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A read or write on the PTY failed unexpectedly.
    #[error("terminal I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal invariant did not hold.
    #[error("{0}")]
    Runtime(String),
}

impl TerminalError {
    /// Returns true for failures that `execute` retries once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TerminalError::Io(_) | TerminalError::Runtime(_))
    }

    /// Returns true if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TerminalError::Timeout { .. })
    }
}

/// Result alias used throughout the terminal crate.
pub type Result<T> = std::result::Result<T, TerminalError>;
