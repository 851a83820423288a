//! # ShellRelay
//!
//! The caller side of the terminal core: configuration, logging and reply
//! rendering, shared by the `shellrelay` binary and any messaging front end
//! built on top of it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relay::config::Config;
//! use relay::reply::{chunk_message, format_reply};
//! use terminal::TerminalManager;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!
//!     let manager = TerminalManager::new(config.terminal.settings());
//!     manager.start().await?;
//!
//!     let result = manager
//!         .execute("uptime", config.terminal.command_timeout())
//!         .await?;
//!     let reply = format_reply(&result.cwd, "uptime", &result.output);
//!     for chunk in chunk_message(&reply, config.terminal.max_output_length) {
//!         println!("{chunk}");
//!     }
//!
//!     manager.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod logging;
pub mod reply;

pub use config::{Config, ConfigError, LogConfig, TerminalConfig};
pub use logging::{init_logging, LogGuard};
pub use reply::{chunk_message, format_reply, render_error};
