// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Concurrent stdout/stderr multiplexing.
//!
//! ```text
//! Multiplexer::multiplex(stdout, stderr, oracle)
//!   preflight: runtime? oracle.probe()?
//!       |
//!       +--> Drainer(STDOUT) --+
//!       |                      +--> flume buffer --> LineStream
//!       +--> Drainer(STDERR) --+                     (Stream<Item = Result<CategorizedLine>>)
//!
//! end of stream  = both drainers stopped AND buffer empty
//! drainer stops  = end of data AND oracle.has_exited()
//! decode fault   = cancel drainers, yield buffered lines, then the fault
//! ```
//!
//! Lines from one channel keep their order. Lines from different channels
//! appear in the order they reached the buffer, which approximates but does
//! not guarantee wall-clock interleaving. Line content keeps its terminator
//! unless [`MuxOptions::strip_terminators`] is set.

mod buffer;
mod drainer;
mod line;
mod oracle;
mod stream;
#[cfg(test)]
mod tests;

pub use buffer::BufferPolicy;
pub use line::{CategorizedLine, LineContent, LineSource};
pub use oracle::{ExitFlag, ProcessHandle, TerminationOracle};
pub use stream::LineStream;

use bon::Builder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::MuxError;
use crate::utility::encoding::Encoding;
use drainer::Drainer;

/// Default interval for oracles that can only be polled.
pub const DEFAULT_EXIT_POLL: Duration = Duration::from_millis(10);
/// Upper bound on the exit poll interval, keeping line latency bounded.
pub const MAX_EXIT_POLL: Duration = Duration::from_millis(50);
const MIN_EXIT_POLL: Duration = Duration::from_millis(1);

/// What a drainer does with a line the configured encoding rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecodeFailurePolicy {
    /// End the stream with [`MuxError::Decode`].
    #[default]
    FailFast,
    /// Log and drop the line.
    Skip,
    /// Substitute U+FFFD for malformed sequences.
    Replace,
}

impl fmt::Display for DecodeFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail-fast"),
            Self::Skip => write!(f, "skip"),
            Self::Replace => write!(f, "replace"),
        }
    }
}

impl FromStr for DecodeFailurePolicy {
    type Err = MuxError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fail" | "fail-fast" | "fail_fast" => Ok(Self::FailFast),
            "skip" => Ok(Self::Skip),
            "replace" | "lossy" => Ok(Self::Replace),
            _ => Err(MuxError::InvalidPolicy {
                value: s.to_string(),
            }),
        }
    }
}

/// Multiplexer settings.
#[derive(Debug, Clone, Builder)]
pub struct MuxOptions {
    #[builder(setters(name = with_encoding), default)]
    encoding: Encoding,
    #[builder(setters(name = with_decode_failure), default)]
    decode_failure: DecodeFailurePolicy,
    #[builder(setters(name = with_buffer), default)]
    buffer: BufferPolicy,
    #[builder(setters(name = with_exit_poll_interval), default = DEFAULT_EXIT_POLL)]
    exit_poll_interval: Duration,
    /// Drop `\n` and a preceding `\r` from each line
    #[builder(setters(name = with_strip_terminators), default)]
    strip_terminators: bool,
    /// Process display name for log fields
    #[builder(into, setters(name = with_label))]
    label: Option<String>,
}

impl Default for MuxOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MuxOptions {
    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    #[must_use]
    pub const fn decode_failure(&self) -> DecodeFailurePolicy {
        self.decode_failure
    }

    #[must_use]
    pub const fn buffer(&self) -> BufferPolicy {
        self.buffer
    }

    /// Returns the exit poll interval, clamped to 1..=50 ms.
    #[must_use]
    pub fn exit_poll_interval(&self) -> Duration {
        self.exit_poll_interval.clamp(MIN_EXIT_POLL, MAX_EXIT_POLL)
    }

    /// Whether lines lose their terminator. Off by default, so `"a\n"` and
    /// an unterminated `"a"` stay distinguishable.
    #[must_use]
    pub const fn strip_terminators(&self) -> bool {
        self.strip_terminators
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

/// Fans a child's stdout and stderr into one [`LineStream`].
#[derive(Debug, Clone, Default)]
pub struct Multiplexer {
    options: MuxOptions,
    token: CancellationToken,
}

impl Multiplexer {
    #[must_use]
    pub fn new(options: MuxOptions) -> Self {
        Self {
            options,
            token: CancellationToken::new(),
        }
    }

    /// Ties every stream started by this multiplexer to `token`.
    ///
    /// Cancelling it stops the drainers and ends the streams early.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    #[must_use]
    pub const fn options(&self) -> &MuxOptions {
        &self.options
    }

    /// Starts draining `stdout` and `stderr` and returns the merged stream.
    ///
    /// Both drainers are spawned on the current tokio runtime before this
    /// returns.
    ///
    /// # Errors
    ///
    /// Fails before spawning anything when called outside a tokio runtime or
    /// when the oracle's [`probe`](TerminationOracle::probe) fails.
    pub fn multiplex<O, E, T>(&self, stdout: O, stderr: E, oracle: T) -> Result<LineStream, MuxError>
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
        T: TerminationOracle,
    {
        let runtime = Self::preflight(&oracle)?;
        let label: Arc<str> = Arc::from(self.options.label().unwrap_or("process"));
        Ok(self.start(&runtime, stdout, stderr, oracle, label))
    }

    /// Takes both output channels from `process` and multiplexes them.
    ///
    /// # Errors
    ///
    /// Fails before taking anything when called outside a tokio runtime,
    /// when the oracle probe fails, or when either channel is gone.
    pub fn multiplex_process<P: ProcessHandle>(&self, process: &mut P) -> Result<LineStream, MuxError> {
        let oracle = process.oracle();
        let runtime = Self::preflight(&oracle)?;

        for stream in [LineSource::Stdout, LineSource::Stderr] {
            if !process.has_stream(stream) {
                return Err(MuxError::MissingStream { stream });
            }
        }
        let stdout = process.take_stdout().ok_or(MuxError::MissingStream {
            stream: LineSource::Stdout,
        })?;
        let stderr = process.take_stderr().ok_or(MuxError::MissingStream {
            stream: LineSource::Stderr,
        })?;

        let label: Arc<str> = Arc::from(
            self.options
                .label()
                .or_else(|| process.name())
                .unwrap_or("process"),
        );
        Ok(self.start(&runtime, stdout, stderr, oracle, label))
    }

    fn preflight<T: TerminationOracle>(oracle: &T) -> Result<Handle, MuxError> {
        let runtime = Handle::try_current().map_err(|_| MuxError::NoRuntime)?;
        oracle.probe()?;
        Ok(runtime)
    }

    fn start<O, E, T>(&self, runtime: &Handle, stdout: O, stderr: E, oracle: T, label: Arc<str>) -> LineStream
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
        T: TerminationOracle,
    {
        let (sink, events) = buffer::shared_buffer(self.options.buffer());
        let token = self.token.child_token();

        let stdout_drainer = self.drainer(stdout, LineSource::Stdout, sink.clone(), oracle.clone(), &token, &label);
        let stderr_drainer = self.drainer(stderr, LineSource::Stderr, sink, oracle, &token, &label);
        let drainers = vec![
            (LineSource::Stdout, runtime.spawn(stdout_drainer.run())),
            (LineSource::Stderr, runtime.spawn(stderr_drainer.run())),
        ];

        debug!(
            process = %label,
            encoding = %self.options.encoding(),
            decode_failure = %self.options.decode_failure(),
            buffer = self.options.buffer().capacity(),
            "multiplexing started"
        );
        LineStream::new(events, drainers, token, label)
    }

    fn drainer<R, T>(
        &self,
        reader: R,
        stream: LineSource,
        sink: flume::Sender<buffer::Event>,
        oracle: T,
        token: &CancellationToken,
        label: &Arc<str>,
    ) -> Drainer<R, T> {
        Drainer {
            reader,
            stream,
            encoding: self.options.encoding(),
            decode_failure: self.options.decode_failure(),
            strip_terminators: self.options.strip_terminators(),
            oracle,
            poll_interval: self.options.exit_poll_interval(),
            sink,
            token: token.clone(),
            label: Arc::clone(label),
        }
    }
}

/// Multiplexes `process` with default options and the given encoding.
///
/// # Errors
///
/// See [`Multiplexer::multiplex_process`].
///
/// # Example
///
/// ```no_run
/// use procmux::mux::multiplex;
/// use procmux::process::ProcessBuilder;
/// use procmux::utility::encoding::Encoding;
///
/// # async fn example() -> anyhow::Result<()> {
/// let mut child = ProcessBuilder::raw("echo out; echo err >&2").spawn()?;
/// let mut lines = multiplex(&mut child, Encoding::UTF8)?;
/// while let Some(line) = lines.next_line().await {
///     let line = line?;
///     print!("[{}] {}", line.source(), line.as_text().unwrap_or_default());
/// }
/// # Ok(())
/// # }
/// ```
pub fn multiplex<P: ProcessHandle>(process: &mut P, encoding: Encoding) -> Result<LineStream, MuxError> {
    let options = MuxOptions::builder().with_encoding(encoding).build();
    Multiplexer::new(options).multiplex_process(process)
}
