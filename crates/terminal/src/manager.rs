//! Persistent shell session management.
//!
//! [`TerminalManager`] owns one long-lived shell on a PTY. It starts and
//! verifies the shell, revives it (within a bounded budget) when it dies,
//! and runs commands against it, returning cleaned output together with the
//! shell's working directory afterwards.
//!
//! Commands must be serialized by the caller: two concurrent `execute`
//! calls would interleave their output. Reconnection is serialized
//! internally.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::Instrument;
use uuid::Uuid;

use crate::cleaner::clean_output;
use crate::error::{Result, TerminalError};
use crate::keys::parse_special_key;
use crate::pty::{
    default_shell_args, LaunchSpec, NativeLauncher, ShellLauncher, ShellProcess, TerminalSize,
};
use crate::reader::{drain, read_output, wait_for_text, ReadSettings};

/// Pause after spawning before the shell is probed.
const STARTUP_SETTLE: Duration = Duration::from_millis(500);

/// How long the startup probe may take to come back.
pub const STARTUP_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Window for discarding stale output.
pub const DRAIN_WINDOW: Duration = Duration::from_secs(1);

/// Delay between tearing a dead session down and starting a new one.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Delay before a failed command is retried.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Read timeout for the working directory probe.
pub const CWD_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive reconnects allowed before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Attempts per `execute` call.
const EXECUTE_ATTEMPTS: u32 = 2;

/// Prefix of the token echoed back during startup verification.
const READY_PREFIX: &str = "shellrelay_ready_";

/// Everything a [`TerminalManager`] needs to run its shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSettings {
    /// Shell executable.
    pub shell: String,
    /// Arguments passed to the shell.
    pub shell_args: Vec<String>,
    /// Directory the shell starts in, and the fallback working directory.
    pub working_dir: PathBuf,
    /// Window size applied at startup.
    pub size: TerminalSize,
    /// Output reader tuning.
    pub read: ReadSettings,
    /// Reconnect budget.
    pub max_reconnect_attempts: u32,
}

impl TerminalSettings {
    /// Settings for `shell` started in `working_dir`, with defaults elsewhere.
    pub fn new(shell: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        let shell = shell.into();
        Self {
            shell_args: default_shell_args(&shell),
            shell,
            working_dir: working_dir.into(),
            size: TerminalSize::default(),
            read: ReadSettings::default(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }

    /// The spawn request derived from these settings.
    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            shell: self.shell.clone(),
            args: self.shell_args.clone(),
            working_dir: self.working_dir.clone(),
            size: self.size,
        }
    }

    fn fallback_cwd(&self) -> String {
        self.working_dir.display().to_string()
    }
}

/// Result of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Working directory of the shell after the command ran.
    pub cwd: String,
    /// Cleaned output of the command.
    pub output: String,
}

/// Connection state as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The shell is running.
    Alive,
    /// No shell is running.
    Dead,
    /// A reconnect is in progress.
    Reconnecting,
    /// The last reconnect found the budget exhausted.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Alive => "alive",
            ConnectionState::Dead => "dead",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The shell and its PTY. `process` is `Some` exactly while `alive`.
struct Session<P> {
    process: Option<P>,
    alive: bool,
    state: ConnectionState,
}

impl<P: ShellProcess> Session<P> {
    fn new() -> Self {
        Self {
            process: None,
            alive: false,
            state: ConnectionState::Dead,
        }
    }

    /// Liveness probe. A shell found dead is torn down.
    fn check_alive(&mut self) -> bool {
        let running = self.alive && self.process.as_mut().is_some_and(|p| p.is_alive());
        if !running && self.alive {
            tracing::warn!(pid = ?self.pid(), "Shell process is no longer running");
            self.teardown();
        }
        running
    }

    fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.pid())
    }

    /// Kills the shell and closes the PTY. Never fails.
    fn teardown(&mut self) {
        if let Some(mut process) = self.process.take() {
            let pid = process.pid();
            if let Err(e) = process.kill() {
                tracing::warn!(pid = ?pid, error = %e, "Failed to kill shell process");
            }
            drop(process);
            tracing::debug!(pid = ?pid, "Shell process terminated");
        }
        self.alive = false;
        self.state = ConnectionState::Dead;
    }
}

/// Manages one persistent shell session.
///
/// Lock order is `reconnect_attempts` before `session`, and the session lock
/// is never held while waiting for the reconnect lock.
pub struct TerminalManager<L: ShellLauncher = NativeLauncher> {
    settings: TerminalSettings,
    launcher: L,
    session: Mutex<Session<L::Process>>,
    /// Reconnect attempts since the last success. Its lock serializes
    /// starts and reconnects.
    reconnect_attempts: Mutex<u32>,
    span: tracing::Span,
}

impl TerminalManager<NativeLauncher> {
    /// Creates a manager that spawns a real shell on a PTY.
    pub fn new(settings: TerminalSettings) -> Self {
        Self::with_launcher(settings, NativeLauncher)
    }
}

impl<L: ShellLauncher> TerminalManager<L> {
    /// Creates a manager that spawns shells through `launcher`.
    pub fn with_launcher(settings: TerminalSettings, launcher: L) -> Self {
        let span = tracing::info_span!(
            "terminal",
            working_dir = %settings.working_dir.display()
        );
        Self {
            settings,
            launcher,
            session: Mutex::new(Session::new()),
            reconnect_attempts: Mutex::new(0),
            span,
        }
    }

    /// Replaces the span all operations are logged under.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// The settings this manager was built with.
    pub fn settings(&self) -> &TerminalSettings {
        &self.settings
    }

    /// Runs the liveness probe.
    pub async fn is_alive(&self) -> bool {
        self.session.lock().await.check_alive()
    }

    /// Process ID of the running shell.
    pub async fn pid(&self) -> Option<u32> {
        self.session.lock().await.pid()
    }

    /// Connection state as last observed.
    pub async fn connection_state(&self) -> ConnectionState {
        self.session.lock().await.state
    }

    /// Reconnect attempts since the last successful connection.
    pub async fn reconnect_attempts(&self) -> u32 {
        *self.reconnect_attempts.lock().await
    }

    /// Starts a fresh shell, stopping any existing one first.
    ///
    /// On success the reconnect budget is restored.
    pub async fn start(&self) -> Result<()> {
        self.start_and_reset().instrument(self.span.clone()).await
    }

    /// Kills the shell and closes the PTY. Safe to call at any time.
    pub async fn stop(&self) {
        async {
            let _attempts = self.reconnect_attempts.lock().await;
            let mut session = self.session.lock().await;
            let was_running = session.process.is_some();
            session.teardown();
            if was_running {
                tracing::info!("Terminal stopped");
            }
        }
        .instrument(self.span.clone())
        .await
    }

    /// Makes sure a live shell is available, reconnecting if needed.
    ///
    /// Returns false once the reconnect budget is spent. A later call tries
    /// again only after a successful [`start`](Self::start).
    pub async fn ensure_connection(&self) -> bool {
        self.reconnect_if_needed()
            .instrument(self.span.clone())
            .await
    }

    /// Runs `command` and returns its cleaned output and the resulting
    /// working directory.
    ///
    /// An I/O or runtime failure is retried once after a short delay.
    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        async {
            let mut attempt = 1;
            loop {
                match self.execute_once(command, timeout).await {
                    Ok(output) => return Ok(output),
                    Err(e) if e.is_retryable() && attempt < EXECUTE_ATTEMPTS => {
                        tracing::warn!(command, attempt, error = %e, "Command failed, retrying");
                        sleep(RETRY_DELAY).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        tracing::error!(command, attempt, error = %e, "Command failed");
                        return Err(e);
                    }
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }

    /// Sends a caret-notation key such as `^C` to the shell.
    pub async fn send_key(&self, key: &str) -> Result<()> {
        self.write_key(key).instrument(self.span.clone()).await
    }

    async fn start_and_reset(&self) -> Result<()> {
        let mut attempts = self.reconnect_attempts.lock().await;
        let mut session = self.session.lock().await;
        self.start_session(&mut session).await?;
        *attempts = 0;
        Ok(())
    }

    async fn write_key(&self, key: &str) -> Result<()> {
        let byte = parse_special_key(key)
            .ok_or_else(|| TerminalError::Runtime(format!("unknown special key: {key}")))?;

        if !self.reconnect_if_needed().await {
            return Err(TerminalError::Connection);
        }

        let mut session = self.session.lock().await;
        let process = session.process.as_mut().ok_or_else(handle_closed)?;
        send_bytes(process, &[byte])?;
        tracing::info!(key, "Sent special key");
        Ok(())
    }

    async fn reconnect_if_needed(&self) -> bool {
        if self.session.lock().await.check_alive() {
            return true;
        }

        let mut attempts = self.reconnect_attempts.lock().await;
        let mut session = self.session.lock().await;

        // Someone else may have reconnected while we waited for the lock.
        if session.check_alive() {
            return true;
        }

        if *attempts >= self.settings.max_reconnect_attempts {
            tracing::error!(attempts = *attempts, "Reconnect budget exhausted");
            session.state = ConnectionState::Failed;
            return false;
        }

        *attempts += 1;
        session.state = ConnectionState::Reconnecting;
        tracing::info!(
            attempt = *attempts,
            max_attempts = self.settings.max_reconnect_attempts,
            "Reconnecting terminal"
        );

        session.teardown();
        session.state = ConnectionState::Reconnecting;
        sleep(RECONNECT_DELAY).await;

        match self.start_session(&mut session).await {
            Ok(()) if session.check_alive() => {
                *attempts = 0;
                tracing::info!("Terminal reconnected");
                true
            }
            Ok(()) => {
                tracing::error!("Terminal died right after reconnecting");
                false
            }
            Err(e) => {
                tracing::error!(attempt = *attempts, error = %e, "Reconnect failed");
                false
            }
        }
    }

    /// Replaces whatever runs in `session` with a fresh, verified shell.
    /// Any failure leaves the session torn down.
    async fn start_session(&self, session: &mut Session<L::Process>) -> Result<()> {
        session.teardown();

        match self.launch_verified(session).await {
            Ok(()) => {
                tracing::info!(pid = ?session.pid(), shell = %self.settings.shell, "Terminal started");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start terminal");
                session.teardown();
                Err(e)
            }
        }
    }

    async fn launch_verified(&self, session: &mut Session<L::Process>) -> Result<()> {
        let process = self.launcher.launch(&self.settings.launch_spec())?;
        let process = session.process.insert(process);
        session.alive = true;
        session.state = ConnectionState::Alive;

        sleep(STARTUP_SETTLE).await;
        verify_shell(process).await?;
        drain(process, DRAIN_WINDOW).await;
        Ok(())
    }

    async fn execute_once(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        if !self.reconnect_if_needed().await {
            return Err(TerminalError::Connection);
        }

        let mut session = self.session.lock().await;
        let process = session.process.as_mut().ok_or_else(handle_closed)?;

        drain(process, DRAIN_WINDOW).await;
        send_line(process, command)?;
        tracing::debug!(command, timeout_secs = timeout.as_secs_f64(), "Command sent");

        let raw = read_output(process, timeout, &self.settings.read).await?;
        let cwd = self.current_directory(process).await;

        let output = clean_output(command, &raw);
        if output.is_empty() && !raw.trim().is_empty() {
            tracing::debug!(command, raw_bytes = raw.len(), "Cleaning removed all output");
        }

        Ok(CommandOutput { cwd, output })
    }

    /// Asks the shell for its working directory, falling back to the
    /// configured one.
    async fn current_directory(&self, process: &mut L::Process) -> String {
        match self.probe_directory(process).await {
            Ok(Some(cwd)) => cwd,
            Ok(None) => self.settings.fallback_cwd(),
            Err(e) => {
                tracing::warn!(error = %e, "Working directory probe failed");
                self.settings.fallback_cwd()
            }
        }
    }

    async fn probe_directory(&self, process: &mut L::Process) -> Result<Option<String>> {
        send_line(process, "pwd")?;
        let raw = read_output(process, CWD_PROBE_TIMEOUT, &self.settings.read).await?;
        Ok(clean_output("pwd", &raw).lines().last().map(str::to_string))
    }
}

impl<L: ShellLauncher> Drop for TerminalManager<L> {
    fn drop(&mut self) {
        self.session.get_mut().teardown();
    }
}

/// Sends a unique probe and waits for the shell to print it back.
async fn verify_shell<P: ShellProcess>(process: &mut P) -> Result<()> {
    let id = Uuid::new_v4().simple().to_string();
    let token = format!("{READY_PREFIX}{id}");

    // Quoted apart so the probe line itself never contains the token.
    send_line(process, &format!("echo '{READY_PREFIX}''{id}'"))?;

    if wait_for_text(process, &token, STARTUP_VERIFY_TIMEOUT).await {
        tracing::debug!("Shell answered the startup probe");
        Ok(())
    } else {
        Err(TerminalError::Startup(
            "shell did not answer the startup probe".to_string(),
        ))
    }
}

fn send_line<W: Write + ?Sized>(writer: &mut W, line: &str) -> Result<()> {
    send_bytes(writer, format!("{line}\n").as_bytes())
}

/// Writes `bytes` in a single call. Anything short of a full write is an
/// error; nothing is re-sent.
fn send_bytes<W: Write + ?Sized>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    let written = writer.write(bytes)?;
    if written != bytes.len() {
        return Err(TerminalError::Runtime(format!(
            "failed to write complete command: wrote {written} of {} bytes",
            bytes.len()
        )));
    }
    writer.flush()?;
    Ok(())
}

fn handle_closed() -> TerminalError {
    TerminalError::Runtime("terminal handle is not open".to_string())
}
