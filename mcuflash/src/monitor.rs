//! Response path: line-oriented reading of device output.
//!
//! The device answers with text lines terminated by `\n` (optionally `\r\n`).
//! [`ResponseListener`] pulls bytes from any [`Read`] source, reassembles
//! them into lines, and hands every line to a caller supplied sink as a
//! [`ResponseEvent`]. The loop keeps running until a [`CancelToken`] is
//! cancelled or the link fails.
//!
//! A read that times out, would block, or returns zero bytes simply means
//! "nothing arrived yet": the listener sleeps for the poll interval and tries
//! again. Any other read error ends the loop.

use {
    log::{debug, trace, warn},
    std::{
        io::{self, Read},
        str::Utf8Error,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::{Duration, Instant},
    },
};

/// Pause between two polls when no data is available.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A pending line longer than this is delivered even without a terminator.
pub const DEFAULT_MAX_LINE_LEN: usize = 4096;

/// Unterminated text is delivered after the link has been quiet this long.
pub const DEFAULT_LINE_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound for a single sleep so cancellation is noticed quickly.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

const READ_BUF_LEN: usize = 256;

/// Shared stop flag.
///
/// Cloning yields a handle to the same flag; cancelling any clone stops every
/// loop that observes it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Something the device said, or failed to say.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize),
    serde(tag = "kind", rename_all = "snake_case")
)]
pub enum ResponseEvent {
    /// A complete, non-empty line with surrounding whitespace removed.
    Line {
        /// Decoded text.
        text: String,
    },
    /// A line that is not valid UTF-8.
    Malformed {
        /// Bytes as received, without the terminator.
        raw: Vec<u8>,
        /// Best effort rendering with replacement characters.
        lossy: String,
    },
    /// The link failed; no further events follow.
    LinkError {
        /// Description of the failure.
        message: String,
    },
}

/// Why the listener loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(rename_all = "snake_case"))]
pub enum ListenExit {
    /// The cancel token was set.
    Cancelled,
    /// A read failed with something other than a timeout.
    Disconnected,
}

/// Listener tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenConfig {
    /// Sleep between polls while idle.
    pub poll_interval: Duration,
    /// Longest line buffered before it is delivered unterminated.
    pub max_line_len: usize,
    /// Quiet time after which a partial line is delivered.
    pub line_timeout: Duration,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            line_timeout: DEFAULT_LINE_TIMEOUT,
        }
    }
}

/// Decode one received line.
///
/// Returns `Ok(None)` for lines that are empty after trimming.
pub fn decode_line(raw: &[u8]) -> Result<Option<String>, Utf8Error> {
    let text = std::str::from_utf8(raw)?.trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

/// Turn a raw line into the event to report, if any.
fn line_event(raw: &[u8]) -> Option<ResponseEvent> {
    match decode_line(raw) {
        Ok(Some(text)) => Some(ResponseEvent::Line { text }),
        Ok(None) => None,
        Err(e) => {
            debug!("Undecodable response ({} bytes): {e}", raw.len());
            Some(ResponseEvent::Malformed {
                raw: raw.to_vec(),
                lossy: String::from_utf8_lossy(raw).trim().to_string(),
            })
        },
    }
}

fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Line reader over a byte source.
pub struct ResponseListener<R: Read> {
    reader: R,
    config: ListenConfig,
    pending: Vec<u8>,
    last_rx: Instant,
}

impl<R: Read> ResponseListener<R> {
    /// Create a listener with the default configuration.
    pub fn new(reader: R) -> Self {
        Self::with_config(reader, ListenConfig::default())
    }

    /// Create a listener with custom configuration.
    pub fn with_config(reader: R, config: ListenConfig) -> Self {
        Self {
            reader,
            config,
            pending: Vec::new(),
            last_rx: Instant::now(),
        }
    }

    /// Give the reader back.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read until cancelled or disconnected, reporting every line to `sink`.
    ///
    /// Each line is reported exactly once, in arrival order. On exit, a
    /// partial line still in the buffer is delivered before returning.
    pub fn run<F>(&mut self, cancel: &CancelToken, mut sink: F) -> ListenExit
    where
        F: FnMut(ResponseEvent),
    {
        let mut buf = [0u8; READ_BUF_LEN];

        let exit = loop {
            if cancel.is_cancelled() {
                break ListenExit::Cancelled;
            }

            match self.reader.read(&mut buf) {
                Ok(0) => self.idle(cancel, &mut sink),
                Ok(n) => {
                    trace!("Received {n} bytes");
                    self.last_rx = Instant::now();
                    self.pending.extend_from_slice(&buf[..n]);
                    self.drain_lines(&mut sink);
                },
                Err(e) if is_idle(&e) => self.idle(cancel, &mut sink),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => {
                    warn!("Response link failed: {e}");
                    self.flush_pending(&mut sink);
                    sink(ResponseEvent::LinkError {
                        message: e.to_string(),
                    });
                    break ListenExit::Disconnected;
                },
            }
        };

        if exit == ListenExit::Cancelled {
            self.flush_pending(&mut sink);
        }
        debug!("Response listener stopped: {exit:?}");
        exit
    }

    /// Deliver every complete line in the buffer.
    fn drain_lines<F: FnMut(ResponseEvent)>(&mut self, sink: &mut F) {
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(event) = line_event(&line[..pos]) {
                sink(event);
            }
        }

        while self.pending.len() >= self.config.max_line_len && self.config.max_line_len > 0 {
            let line: Vec<u8> = self.pending.drain(..self.config.max_line_len).collect();
            debug!("Line exceeds {} bytes, delivering unterminated", line.len());
            if let Some(event) = line_event(&line) {
                sink(event);
            }
        }
    }

    fn flush_pending<F: FnMut(ResponseEvent)>(&mut self, sink: &mut F) {
        if self.pending.is_empty() {
            return;
        }
        let line = std::mem::take(&mut self.pending);
        if let Some(event) = line_event(&line) {
            sink(event);
        }
    }

    fn idle<F: FnMut(ResponseEvent)>(&mut self, cancel: &CancelToken, sink: &mut F) {
        if !self.pending.is_empty() && self.last_rx.elapsed() >= self.config.line_timeout {
            self.flush_pending(sink);
        }

        let deadline = Instant::now() + self.config.poll_interval;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return;
            }
            std::thread::sleep(left.min(SLEEP_SLICE));
        }
    }
}
