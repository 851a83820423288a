//! ShellRelay
//!
//! Drives a persistent shell session from the command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use relay::config::Config;
use relay::logging::init_logging;
use relay::reply::{chunk_message, format_reply, render_error};
use terminal::{is_special_key, TerminalManager};
use tokio::io::{AsyncBufReadExt, BufReader};

/// ShellRelay - run commands in a persistent shell session.
#[derive(Parser, Debug)]
#[command(name = "shellrelay")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run one command in a fresh session and print the reply
    Exec {
        /// Timeout in seconds (defaults to the configured command_timeout)
        #[arg(long, short)]
        timeout: Option<u64>,

        /// Command line to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Read commands from stdin and run them in one persistent session
    ///
    /// A line that is a single caret key such as ^C is sent as that key.
    Repl,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    let _log_guard = init_logging(&config.log, cli.verbose)?;
    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    match cli.command {
        Commands::Exec { timeout, command } => {
            let command = command.join(" ");
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.terminal.command_timeout());
            Ok(run_exec(&config, &command, timeout).await)
        }
        Commands::Repl => {
            run_repl(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Runs a single command in a fresh session.
async fn run_exec(config: &Config, command: &str, timeout: Duration) -> ExitCode {
    let manager = TerminalManager::new(config.terminal.settings());

    if let Err(e) = manager.start().await {
        eprintln!("{}", render_error(&e));
        return ExitCode::FAILURE;
    }

    let code = match manager.execute(command, timeout).await {
        Ok(result) => {
            print_reply(config, &format_reply(&result.cwd, command, &result.output));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", render_error(&e));
            ExitCode::FAILURE
        }
    };

    manager.stop().await;
    code
}

/// Runs commands from stdin until EOF or Ctrl-C.
async fn run_repl(config: &Config) -> anyhow::Result<()> {
    let manager = TerminalManager::new(config.terminal.settings());
    manager
        .start()
        .await
        .context("Failed to start terminal session")?;
    tracing::info!("Terminal session ready, reading commands from stdin");

    let result = repl_loop(&manager, config).await;

    manager.stop().await;
    result
}

async fn repl_loop(manager: &TerminalManager, config: &Config) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, shutting down");
                return Ok(());
            }
        };

        let Some(line) = line else {
            return Ok(());
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if is_special_key(line) {
            match manager.send_key(line).await {
                Ok(()) => println!("Sent {line}"),
                Err(e) => eprintln!("{}", render_error(&e)),
            }
            continue;
        }

        match manager
            .execute(line, config.terminal.command_timeout())
            .await
        {
            Ok(result) => print_reply(config, &format_reply(&result.cwd, line, &result.output)),
            Err(e) => eprintln!("{}", render_error(&e)),
        }
    }
}

fn print_reply(config: &Config, reply: &str) {
    for chunk in chunk_message(reply, config.terminal.max_output_length) {
        println!("{chunk}");
    }
}
