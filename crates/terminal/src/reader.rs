//! Reading shell output from a non-blocking PTY handle.
//!
//! The handle is polled, sleeping for the retry interval whenever a read
//! would block. Only reads that return zero bytes count against the retry
//! budget, so a command that is merely slow is bounded by its timeout.
//! Reading stops on whichever comes first:
//!
//! - the command timeout, which is an error only if nothing arrived at all,
//! - the quiescence window after the last received byte,
//! - the retry budget, which is an error only if nothing arrived at all.

use std::io::{ErrorKind, Read};
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::error::{Result, TerminalError};

/// Buffer size for reading from the PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Default sleep between empty reads.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Default number of zero-byte reads tolerated.
pub const DEFAULT_MAX_RETRIES: u32 = 50;

/// Silence after the last byte that marks a command as finished.
pub const QUIESCENCE_WINDOW: Duration = Duration::from_secs(2);

/// Tuning for [`read_output`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSettings {
    /// Sleep between reads that return nothing.
    pub retry_interval: Duration,
    /// Zero-byte reads tolerated before giving up.
    pub max_retries: u32,
    /// Silence after the last byte that ends the read.
    pub quiescence: Duration,
}

impl Default for ReadSettings {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            quiescence: QUIESCENCE_WINDOW,
        }
    }
}

/// Incremental UTF-8 decoder.
///
/// An incomplete multi-byte sequence at the end of a chunk is held back until
/// the next chunk completes it. Bytes that can never decode are replaced.
#[derive(Debug, Default)]
pub struct Utf8Buffer {
    pending: Vec<u8>,
}

impl Utf8Buffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and moves everything decodable into `out`.
    pub fn push(&mut self, bytes: &[u8], out: &mut String) {
        self.pending.extend_from_slice(bytes);

        loop {
            let (valid, invalid) = match std::str::from_utf8(&self.pending) {
                Ok(_) => (self.pending.len(), None),
                Err(e) => (e.valid_up_to(), e.error_len()),
            };

            out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));

            match invalid {
                Some(len) => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    self.pending.drain(..valid + len);
                }
                None => {
                    self.pending.drain(..valid);
                    return;
                }
            }
        }
    }

    /// Flushes whatever is still buffered, lossily.
    pub fn finish(&mut self, out: &mut String) {
        if !self.pending.is_empty() {
            out.push_str(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
    }

    /// Number of bytes waiting for the rest of their sequence.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Reads command output until it quiesces or `timeout` elapses.
///
/// Fails with [`TerminalError::Timeout`] when nothing arrives within
/// `timeout`, and with [`TerminalError::Runtime`] when zero-byte reads use up
/// the retry budget first. Once any data has arrived, both conditions end the read and
/// the accumulated text is returned.
pub async fn read_output<R: Read + ?Sized>(
    source: &mut R,
    timeout: Duration,
    settings: &ReadSettings,
) -> Result<String> {
    let started = Instant::now();
    let mut last_data = started;
    let mut received = false;
    let mut retries = 0u32;
    let mut decoder = Utf8Buffer::new();
    let mut output = String::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        let now = Instant::now();

        if now.duration_since(started) > timeout {
            if !received {
                return Err(TerminalError::Timeout { timeout });
            }
            break;
        }

        if received && now.duration_since(last_data) > settings.quiescence {
            break;
        }

        match source.read(&mut buffer) {
            Ok(n) if n > 0 => {
                decoder.push(&buffer[..n], &mut output);
                received = true;
                last_data = now;
                retries = 0;
            }
            Ok(_) => {
                if note_empty_read(&mut retries, received, settings)? {
                    break;
                }
                sleep(settings.retry_interval).await;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => sleep(settings.retry_interval).await,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                if !received {
                    return Err(TerminalError::Io(e));
                }
                tracing::error!(error = %e, "Error reading from terminal");
                break;
            }
        }
    }

    decoder.finish(&mut output);
    tracing::trace!(
        bytes = output.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Read terminal output"
    );

    Ok(output)
}

/// Counts a zero-byte read. Returns `Ok(true)` when the loop should stop.
fn note_empty_read(retries: &mut u32, received: bool, settings: &ReadSettings) -> Result<bool> {
    *retries += 1;
    if *retries < settings.max_retries {
        return Ok(false);
    }
    if !received {
        return Err(TerminalError::Runtime(
            "no data received from terminal after maximum retries".to_string(),
        ));
    }
    Ok(true)
}

/// Discards pending output for up to `window`.
///
/// Stops early at end of file. Returns the number of bytes discarded.
pub async fn drain<R: Read + ?Sized>(source: &mut R, window: Duration) -> usize {
    let started = Instant::now();
    let mut discarded = 0;
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    while started.elapsed() < window {
        match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => discarded += n,
            Err(_) => sleep(DEFAULT_RETRY_INTERVAL).await,
        }
    }

    if discarded > 0 {
        tracing::debug!(bytes = discarded, "Discarded stale terminal output");
    }
    discarded
}

/// Polls until `needle` shows up in the output or `timeout` elapses.
pub async fn wait_for_text<R: Read + ?Sized>(
    source: &mut R,
    needle: &str,
    timeout: Duration,
) -> bool {
    let started = Instant::now();
    let mut decoder = Utf8Buffer::new();
    let mut seen = String::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    while started.elapsed() < timeout {
        match source.read(&mut buffer) {
            Ok(n) if n > 0 => {
                decoder.push(&buffer[..n], &mut seen);
                if seen.contains(needle) {
                    return true;
                }
            }
            Ok(_) => sleep(DEFAULT_RETRY_INTERVAL).await,
            Err(e) if e.kind() == ErrorKind::WouldBlock => sleep(DEFAULT_RETRY_INTERVAL).await,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!(error = %e, "Shell verification read failed");
                return false;
            }
        }
    }

    false
}
