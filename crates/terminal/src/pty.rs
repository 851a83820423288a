//! PTY spawning.
//!
//! A [`ShellLauncher`] turns a [`LaunchSpec`] into a running shell attached
//! to a pseudo-terminal. The returned [`ShellProcess`] is the exclusive
//! owner of the primary (master) side: reads and writes on it are the
//! shell's terminal I/O, and reads never block.
//!
//! [`NativeLauncher`] is the `portable-pty` backed implementation.

use std::io::{self, Read, Write};
use std::os::fd::{BorrowedFd, RawFd};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{self, Signal};
use nix::sys::termios::{self, LocalFlags, SetArg};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use crate::error::{Result, TerminalError};

/// Search path handed to the shell when the daemon has none.
const FALLBACK_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Prompt string exported to the shell.
pub const PROMPT: &str = "$ ";

/// Terminal window size, applied once when the PTY is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl From<TerminalSize> for PtySize {
    fn from(size: TerminalSize) -> Self {
        PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: size.pixel_width,
            pixel_height: size.pixel_height,
        }
    }
}

/// Everything needed to spawn the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Shell executable.
    pub shell: String,
    /// Arguments passed to the shell.
    pub args: Vec<String>,
    /// Directory the shell starts in.
    pub working_dir: PathBuf,
    /// Window size of the PTY.
    pub size: TerminalSize,
}

/// A running shell and the primary side of its PTY.
///
/// `Read` must not block: with nothing to read it fails with
/// [`io::ErrorKind::WouldBlock`].
pub trait ShellProcess: Read + Write + Send {
    /// Process ID of the shell, if known.
    fn pid(&self) -> Option<u32>;

    /// Returns true while the shell process exists.
    fn is_alive(&mut self) -> bool;

    /// Force-terminates the shell.
    fn kill(&mut self) -> io::Result<()>;
}

/// Spawns shells attached to a fresh PTY.
pub trait ShellLauncher: Send + Sync {
    /// The process handle produced by this launcher.
    type Process: ShellProcess + 'static;

    /// Allocates a PTY and spawns the shell described by `spec`.
    fn launch(&self, spec: &LaunchSpec) -> Result<Self::Process>;
}

/// Launcher backed by the platform PTY via `portable-pty`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLauncher;

impl ShellLauncher for NativeLauncher {
    type Process = NativeProcess;

    fn launch(&self, spec: &LaunchSpec) -> Result<NativeProcess> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(spec.size.into())
            .map_err(|e| TerminalError::Startup(format!("failed to open PTY: {e}")))?;

        let fd = master_fd(pair.master.as_ref())?;
        disable_echo(fd)?;
        set_nonblocking(fd)?;

        let mut cmd = CommandBuilder::new(&spec.shell);
        cmd.args(&spec.args);
        cmd.cwd(&spec.working_dir);
        cmd.env_clear();
        for (key, value) in child_environment(&spec.shell) {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TerminalError::Startup(format!("failed to spawn {}: {e}", spec.shell)))?;

        // The shell holds the only copy of the secondary side from here on.
        drop(pair.slave);

        let pid = child.process_id();
        let mut process = NativeProcess {
            reader: None,
            writer: None,
            child,
            master: pair.master,
            pid,
        };

        if let Err(e) = process.open_streams() {
            let _ = process.kill();
            return Err(e);
        }

        tracing::debug!(pid = ?pid, shell = %spec.shell, "Spawned shell on PTY");
        Ok(process)
    }
}

/// A shell spawned by [`NativeLauncher`].
pub struct NativeProcess {
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
    master: Box<dyn MasterPty + Send>,
    pid: Option<u32>,
}

impl NativeProcess {
    fn open_streams(&mut self) -> Result<()> {
        let reader = self
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::Startup(format!("failed to get PTY reader: {e}")))?;
        let writer = self
            .master
            .take_writer()
            .map_err(|e| TerminalError::Startup(format!("failed to get PTY writer: {e}")))?;
        self.reader = Some(reader);
        self.writer = Some(writer);
        Ok(())
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "PTY handle is closed")
}

impl Read for NativeProcess {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.as_mut().ok_or_else(closed)?.read(buf)
    }
}

impl Write for NativeProcess {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.as_mut().ok_or_else(closed)?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.as_mut().ok_or_else(closed)?.flush()
    }
}

impl ShellProcess for NativeProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn kill(&mut self) -> io::Result<()> {
        // Already reaped: the pid may belong to someone else by now.
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }

        match self.pid {
            Some(pid) => match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => return Err(e.into()),
            },
            None => self.child.kill()?,
        }

        // Reap it so the pid does not linger as a zombie.
        self.child.wait()?;
        Ok(())
    }
}

/// Builds the shell's environment from scratch.
///
/// Nothing is inherited beyond `PATH` and `HOME`.
pub fn child_environment(shell: &str) -> Vec<(&'static str, String)> {
    vec![
        ("TERM", "xterm".to_string()),
        (
            "PATH",
            std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string()),
        ),
        ("HOME", std::env::var("HOME").unwrap_or_default()),
        ("SHELL", shell.to_string()),
        ("PS1", PROMPT.to_string()),
        ("LANG", "en_US.UTF-8".to_string()),
    ]
}

/// Arguments that keep a shell from sourcing user rc files.
pub fn default_shell_args(shell: &str) -> Vec<String> {
    let name = Path::new(shell)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(shell);

    match name {
        "bash" => vec!["--norc".to_string()],
        "zsh" => vec!["--no-rcs".to_string()],
        _ => Vec::new(),
    }
}

fn master_fd(master: &(dyn MasterPty + Send)) -> Result<RawFd> {
    master
        .as_raw_fd()
        .ok_or_else(|| TerminalError::Startup("PTY master has no file descriptor".to_string()))
}

fn disable_echo(fd: RawFd) -> Result<()> {
    // SAFETY: `fd` belongs to the PTY master, which outlives this call.
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };

    let mut attrs = termios::tcgetattr(fd)
        .map_err(|e| TerminalError::Startup(format!("failed to read terminal attributes: {e}")))?;
    attrs.local_flags.remove(LocalFlags::ECHO);
    termios::tcsetattr(fd, SetArg::TCSANOW, &attrs)
        .map_err(|e| TerminalError::Startup(format!("failed to disable echo: {e}")))
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)
        .map_err(|e| TerminalError::Startup(format!("failed to read PTY flags: {e}")))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))
        .map_err(|e| TerminalError::Startup(format!("failed to set non-blocking: {e}")))?;
    Ok(())
}
