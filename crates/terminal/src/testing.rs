//! Test doubles for the reader and the session manager.

use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Result, TerminalError};
use crate::pty::{LaunchSpec, ShellLauncher, ShellProcess};

/// Non-blocking byte source that releases chunks on a (tokio) clock.
///
/// With nothing due it fails with `WouldBlock`, returns zero bytes once
/// marked at end of file, or fails with the configured error kind.
#[derive(Debug)]
pub(crate) struct ScriptedOutput {
    origin: Instant,
    chunks: VecDeque<(Duration, Vec<u8>)>,
    failure: Option<ErrorKind>,
    eof: bool,
}

impl ScriptedOutput {
    pub(crate) fn new() -> Self {
        Self {
            origin: Instant::now(),
            chunks: VecDeque::new(),
            failure: None,
            eof: false,
        }
    }

    /// Schedules `bytes` to become readable `at` after creation.
    pub(crate) fn emit_at(mut self, at: Duration, bytes: &[u8]) -> Self {
        self.chunks.push_back((at, bytes.to_vec()));
        self
    }

    pub(crate) fn fail_with(mut self, kind: ErrorKind) -> Self {
        self.failure = Some(kind);
        self
    }

    /// Idle reads return zero bytes instead of `WouldBlock`.
    pub(crate) fn at_eof(mut self) -> Self {
        self.eof = true;
        self
    }

    /// Makes `bytes` readable immediately, after anything already queued.
    pub(crate) fn push_now(&mut self, bytes: &[u8]) {
        self.push_after(Duration::ZERO, bytes);
    }

    /// Makes `bytes` readable `delay` from now, after anything already queued.
    pub(crate) fn push_after(&mut self, delay: Duration, bytes: &[u8]) {
        let at = self.origin.elapsed() + delay;
        self.chunks.push_back((at, bytes.to_vec()));
    }
}

impl Read for ScriptedOutput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let now = self.origin.elapsed();

        if let Some((at, chunk)) = self.chunks.front_mut() {
            if *at <= now {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                chunk.drain(..n);
                if chunk.is_empty() {
                    self.chunks.pop_front();
                }
                return Ok(n);
            }
        }

        match self.failure {
            Some(kind) => Err(io::Error::new(kind, "scripted read failure")),
            None if self.eof => Ok(0),
            None => Err(ErrorKind::WouldBlock.into()),
        }
    }
}

/// Shared, inspectable state behind [`FakeLauncher`].
#[derive(Debug, Default)]
pub(crate) struct FakeShell {
    /// Successful launches so far.
    pub launches: usize,
    /// Kill calls on any process.
    pub kills: usize,
    /// Kill calls fail after recording the attempt.
    pub fail_kill: bool,
    /// Every launch attempt fails.
    pub fail_launches: bool,
    /// The shell never prints anything.
    pub silent: bool,
    /// Liveness of the most recently launched process.
    pub alive: bool,
    /// Writes report one byte fewer than requested.
    pub short_write: bool,
    /// Commands whose next read fails with an I/O error, counted down.
    pub failing_commands: usize,
    /// Lines written by the manager, without the trailing newline.
    pub writes: Vec<String>,
    /// Raw bytes written, including keys.
    pub raw_writes: Vec<Vec<u8>>,
    /// Canned output per command line.
    pub responses: HashMap<String, String>,
    /// How long a canned response takes to appear.
    pub delays: HashMap<String, Duration>,
    /// Directory reported by `pwd`; nothing is printed when empty.
    pub cwd: String,
    generation: u64,
}

impl FakeShell {
    /// Simulates the current shell exiting on its own.
    pub(crate) fn kill_current(&mut self) {
        self.alive = false;
    }
}

/// Launcher producing [`FakeProcess`] shells that answer from [`FakeShell`].
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeLauncher {
    pub state: Arc<Mutex<FakeShell>>,
}

impl FakeLauncher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, command: &str, output: &str) {
        self.with(|shell| {
            shell
                .responses
                .insert(command.to_string(), output.to_string());
        });
    }

    /// Like [`FakeLauncher::respond`], with the output appearing `delay`
    /// after the command is written.
    pub(crate) fn respond_after(&self, command: &str, delay: Duration, output: &str) {
        self.respond(command, output);
        self.with(|shell| {
            shell.delays.insert(command.to_string(), delay);
        });
    }

    pub(crate) fn with<T>(&self, f: impl FnOnce(&mut FakeShell) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }
}

impl ShellLauncher for FakeLauncher {
    type Process = FakeProcess;

    fn launch(&self, _spec: &LaunchSpec) -> Result<FakeProcess> {
        let mut shell = self.state.lock().unwrap();
        if shell.fail_launches {
            return Err(TerminalError::Startup("launch refused".to_string()));
        }

        shell.launches += 1;
        shell.generation += 1;
        shell.alive = true;

        let mut output = ScriptedOutput::new();
        if !shell.silent {
            output.push_now(b"welcome banner\r\n$ ");
        }

        Ok(FakeProcess {
            state: Arc::clone(&self.state),
            generation: shell.generation,
            output,
            fail_next_read: false,
        })
    }
}

/// A scripted shell. Echo is off, like the real PTY after startup.
#[derive(Debug)]
pub(crate) struct FakeProcess {
    state: Arc<Mutex<FakeShell>>,
    generation: u64,
    output: ScriptedOutput,
    fail_next_read: bool,
}

impl FakeProcess {
    fn answer(&mut self, shell: &mut FakeShell, line: &str) {
        if shell.silent {
            return;
        }

        let reply = if let Some(arg) = line.strip_prefix("echo ") {
            Some(arg.replace('\'', ""))
        } else if line == "pwd" {
            (!shell.cwd.is_empty()).then(|| shell.cwd.clone())
        } else if let Some(response) = shell.responses.get(line) {
            Some(response.clone())
        } else {
            None
        };

        if let Some(reply) = reply {
            let delay = shell.delays.get(line).copied().unwrap_or_default();
            self.output
                .push_after(delay, format!("{reply}\r\n$ ").as_bytes());
        } else if shell.failing_commands > 0 && line != "pwd" {
            shell.failing_commands -= 1;
            self.fail_next_read = true;
        }
    }
}

impl Read for FakeProcess {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fail_next_read {
            self.fail_next_read = false;
            return Err(io::Error::other("input/output error"));
        }
        self.output.read(buf)
    }
}

impl Write for FakeProcess {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let state = Arc::clone(&self.state);
        let mut shell = state.lock().unwrap();
        shell.raw_writes.push(buf.to_vec());

        let text = String::from_utf8_lossy(buf).into_owned();
        for line in text.lines() {
            shell.writes.push(line.to_string());
            self.answer(&mut shell, line);
        }

        if shell.short_write {
            return Ok(buf.len().saturating_sub(1));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ShellProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(1000 + self.generation as u32)
    }

    fn is_alive(&mut self) -> bool {
        let shell = self.state.lock().unwrap();
        shell.alive && shell.generation == self.generation
    }

    fn kill(&mut self) -> io::Result<()> {
        let mut shell = self.state.lock().unwrap();
        shell.kills += 1;
        if shell.fail_kill {
            return Err(io::Error::other("operation not permitted"));
        }
        if shell.generation == self.generation {
            shell.alive = false;
        }
        Ok(())
    }
}
