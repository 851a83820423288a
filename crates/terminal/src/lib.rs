//! # ShellRelay Terminal Core
//!
//! A persistent shell session behind a pseudo-terminal, driven one command
//! at a time.
//!
//! ## Overview
//!
//! - **Lifecycle**: spawn the shell on a PTY with a minimal environment,
//!   verify it answers, tear it down on request
//! - **Reconnection**: detect a dead shell and restart it, at most three
//!   times in a row
//! - **Execution**: send a command, read until the output goes quiet, and
//!   report the cleaned output with the shell's working directory
//!
//! ## Architecture
//!
//! ```text
//! execute ──► ensure_connection ──► start (when dead)
//!    │
//!    ├──► write command ──► read_output ──► clean_output
//!    └──► pwd probe
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use terminal::{TerminalManager, TerminalSettings};
//!
//! #[tokio::main]
//! async fn main() -> terminal::Result<()> {
//!     let manager = TerminalManager::new(TerminalSettings::new("/bin/bash", "/tmp"));
//!     manager.start().await?;
//!
//!     let result = manager.execute("ls", Duration::from_secs(30)).await?;
//!     println!("{}> ls\n{}", result.cwd, result.output);
//!
//!     manager.stop().await;
//!     Ok(())
//! }
//! ```

pub mod cleaner;
pub mod error;
pub mod keys;
pub mod manager;
pub mod pty;
pub mod reader;

#[cfg(test)]
pub(crate) mod testing;

pub use cleaner::{clean_output, PROMPT_MARKERS};
pub use error::{Result, TerminalError};
pub use keys::{is_special_key, parse_special_key};
pub use manager::{CommandOutput, ConnectionState, TerminalManager, TerminalSettings};
pub use pty::{LaunchSpec, NativeLauncher, ShellLauncher, ShellProcess, TerminalSize};
pub use reader::ReadSettings;
