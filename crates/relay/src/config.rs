//! Configuration management for ShellRelay.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/shellrelay/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use terminal::pty::default_shell_args;
use terminal::{ReadSettings, TerminalSettings};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("shell_path does not exist: {0}")]
    InvalidShellPath(String),

    #[error("working_dir is not a directory: {}", .0.display())]
    InvalidWorkingDir(PathBuf),

    #[error("command_timeout must be between 1 and 3600 seconds, got {0}")]
    InvalidCommandTimeout(u64),

    #[error("max_output_length must be greater than 0, got {0}")]
    InvalidMaxOutputLength(usize),

    #[error("read_retry_interval_ms must be between 1 and 10000, got {0}")]
    InvalidRetryInterval(u64),

    #[error("read_max_retries must be greater than 0, got {0}")]
    InvalidRetryBudget(u32),

    #[error("log level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for ShellRelay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Shell session configuration.
    pub terminal: TerminalConfig,

    /// Logging configuration.
    pub log: LogConfig,
}

/// Shell session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminalConfig {
    /// Shell executable, absolute or looked up on `PATH`.
    pub shell_path: String,

    /// Arguments passed to the shell.
    pub shell_args: Vec<String>,

    /// Directory the shell starts in.
    pub working_dir: PathBuf,

    /// Command execution timeout in seconds.
    pub command_timeout: u64,

    /// Maximum characters per reply chunk.
    pub max_output_length: usize,

    /// Sleep between empty reads, in milliseconds.
    pub read_retry_interval_ms: u64,

    /// Consecutive empty reads tolerated before giving up.
    pub read_max_retries: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,

    /// Optional log file, written in addition to the console.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        let shell_path = default_shell();
        Self {
            shell_args: default_shell_args(&shell_path),
            shell_path,
            working_dir: default_working_dir(),
            command_timeout: 30,
            max_output_length: 4000,
            read_retry_interval_ms: 100,
            read_max_retries: 50,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl TerminalConfig {
    /// Core settings for a [`terminal::TerminalManager`].
    pub fn settings(&self) -> TerminalSettings {
        let mut settings = TerminalSettings::new(&self.shell_path, &self.working_dir);
        settings.shell_args = self.shell_args.clone();
        settings.read = ReadSettings {
            retry_interval: Duration::from_millis(self.read_retry_interval_ms),
            max_retries: self.read_max_retries,
            ..ReadSettings::default()
        };
        settings
    }

    /// Command execution timeout.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shellrelay")
        .join("config.toml")
}

/// Returns the default shell for the current user.
fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|shell| !shell.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

/// Returns the home directory, or the current directory without one.
fn default_working_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Reads a non-empty environment variable.
fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - SHELLRELAY_SHELL_PATH: Override the shell executable
    /// - SHELLRELAY_WORKING_DIR: Override the starting directory
    /// - SHELLRELAY_COMMAND_TIMEOUT: Override the command timeout (seconds)
    /// - SHELLRELAY_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - SHELLRELAY_LOG_FILE: Override the log file
    pub fn apply_env_overrides(&mut self) {
        if let Some(shell) = env_override("SHELLRELAY_SHELL_PATH") {
            tracing::info!(shell = %shell, "Overriding shell_path from environment");
            self.terminal.shell_path = shell;
        }

        if let Some(dir) = env_override("SHELLRELAY_WORKING_DIR") {
            tracing::info!(working_dir = %dir, "Overriding working_dir from environment");
            self.terminal.working_dir = PathBuf::from(dir);
        }

        if let Some(timeout) = env_override("SHELLRELAY_COMMAND_TIMEOUT") {
            match timeout.parse::<u64>() {
                Ok(secs) => {
                    tracing::info!(timeout_secs = secs, "Overriding command_timeout from environment");
                    self.terminal.command_timeout = secs;
                }
                Err(e) => {
                    tracing::warn!(value = %timeout, error = %e, "Ignoring invalid SHELLRELAY_COMMAND_TIMEOUT");
                }
            }
        }

        if let Some(level) = env_override("SHELLRELAY_LOG_LEVEL") {
            tracing::info!(level = %level, "Overriding log level from environment");
            self.log.level = level;
        }

        if let Some(file) = env_override("SHELLRELAY_LOG_FILE") {
            tracing::info!(file = %file, "Overriding log file from environment");
            self.log.file = Some(PathBuf::from(file));
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let terminal = &self.terminal;

        // Validate shell_path: an existing absolute path, or found on PATH
        let shell_path = Path::new(&terminal.shell_path);
        let shell_found = if shell_path.is_absolute() {
            shell_path.exists()
        } else {
            which::which(&terminal.shell_path).is_ok()
        };
        if !shell_found {
            return Err(ConfigError::InvalidShellPath(terminal.shell_path.clone()));
        }

        if !terminal.working_dir.is_dir() {
            return Err(ConfigError::InvalidWorkingDir(terminal.working_dir.clone()));
        }

        // Validate command_timeout: 1-3600
        if !(1..=3600).contains(&terminal.command_timeout) {
            return Err(ConfigError::InvalidCommandTimeout(terminal.command_timeout));
        }

        if terminal.max_output_length == 0 {
            return Err(ConfigError::InvalidMaxOutputLength(terminal.max_output_length));
        }

        // Validate read_retry_interval_ms: 1-10000
        if !(1..=10_000).contains(&terminal.read_retry_interval_ms) {
            return Err(ConfigError::InvalidRetryInterval(terminal.read_retry_interval_ms));
        }

        if terminal.read_max_retries == 0 {
            return Err(ConfigError::InvalidRetryBudget(terminal.read_max_retries));
        }

        // Validate log level is a known value
        let level = self.log.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log.level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
