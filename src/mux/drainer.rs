// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! One drainer per output channel.
//!
//! ```text
//! RUNNING
//!   read chunk ──► LineSplitter ──► decode ──► Event::Line ──► buffer
//!   read == 0  ──► flush fragment
//!                  exited? ── yes ──► STOPPED
//!                          └─ no ───► await exit, read again
//!   read error ──► Event::Fault ──► STOPPED
//!   bad bytes  ──► Event::Fault ──► discard rest ──► STOPPED  (fail-fast)
//!   cancelled  ──► STOPPED
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::DecodeFailurePolicy;
use super::buffer::Event;
use super::line::{CategorizedLine, LineContent, LineSource};
use super::oracle::TerminationOracle;
use crate::error::MuxError;
use crate::utility::encoding::{Encoding, LineSplitter, decode_lossy, decode_strict};

const CHUNK_SIZE: usize = 8 * 1024;

/// Why a drainer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// End of channel observed after the process exited.
    Finished,
    Cancelled,
    /// The consumer went away.
    Disconnected,
    ReadFailed,
    DecodeFailed,
}

/// Drains one output channel into the shared buffer.
pub(super) struct Drainer<R, T> {
    pub(super) reader: R,
    pub(super) stream: LineSource,
    pub(super) encoding: Encoding,
    pub(super) decode_failure: DecodeFailurePolicy,
    pub(super) strip_terminators: bool,
    pub(super) oracle: T,
    pub(super) poll_interval: Duration,
    pub(super) sink: flume::Sender<Event>,
    pub(super) token: CancellationToken,
    pub(super) label: Arc<str>,
}

impl<R, T> Drainer<R, T>
where
    R: AsyncRead + Unpin + Send + 'static,
    T: TerminationOracle,
{
    /// Runs until the channel is exhausted and the process has exited.
    pub(super) async fn run(mut self) {
        debug!(process = %self.label, stream = %self.stream, "drainer started");

        let mut splitter = LineSplitter::new(self.encoding).strip_terminators(self.strip_terminators);
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut lines: u64 = 0;

        let stop = 'drain: loop {
            let read = tokio::select! {
                biased;
                () = self.token.cancelled() => break 'drain Stop::Cancelled,
                read = self.reader.read(&mut chunk) => read,
            };

            match read {
                Ok(0) => {
                    if let Some(raw) = splitter.finish()
                        && let Err(stop) = self.emit(raw, &mut lines).await
                    {
                        break 'drain stop;
                    }
                    if self.oracle.has_exited() {
                        break 'drain Stop::Finished;
                    }
                    // The channel reported end of data while the process is
                    // still alive; only the exit confirms it.
                    trace!(process = %self.label, stream = %self.stream, "end of data before exit");
                    tokio::select! {
                        biased;
                        () = self.token.cancelled() => break 'drain Stop::Cancelled,
                        () = self.oracle.exited(self.poll_interval) => {}
                    }
                }
                Ok(n) => {
                    splitter.push(&chunk[..n]);
                    while let Some(raw) = splitter.next_line() {
                        if let Err(stop) = self.emit(raw, &mut lines).await {
                            break 'drain stop;
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(
                        process = %self.label,
                        stream = %self.stream,
                        error = %e,
                        "error reading stream"
                    );
                    let fault = MuxError::Read {
                        stream: self.stream,
                        source: e,
                    };
                    let sent = self.send(Event::Fault(fault)).await;
                    break 'drain sent.err().unwrap_or(Stop::ReadFailed);
                }
            }
        };

        if stop == Stop::DecodeFailed {
            self.discard_remaining().await;
        }

        debug!(
            process = %self.label,
            stream = %self.stream,
            lines,
            reason = ?stop,
            "drainer stopped"
        );
    }

    /// Decodes and appends one raw line to the buffer.
    async fn emit(&mut self, raw: Vec<u8>, lines: &mut u64) -> Result<(), Stop> {
        *lines += 1;
        let content = match self.encoding {
            Encoding::Raw => LineContent::Bytes(raw),
            Encoding::Text(charset) => {
                let decoded = decode_strict(charset, &raw).map(std::borrow::Cow::into_owned);
                match (decoded, self.decode_failure) {
                    (Some(text), _) => LineContent::Text(text),
                    (None, DecodeFailurePolicy::Replace) => {
                        LineContent::Text(decode_lossy(charset, &raw).into_owned())
                    }
                    (None, DecodeFailurePolicy::Skip) => {
                        warn!(
                            process = %self.label,
                            stream = %self.stream,
                            line = *lines,
                            encoding = charset.name(),
                            "skipping undecodable line"
                        );
                        return Ok(());
                    }
                    (None, DecodeFailurePolicy::FailFast) => {
                        let fault = MuxError::Decode {
                            stream: self.stream,
                            encoding: charset.name(),
                            line: *lines,
                            bytes: raw,
                        };
                        self.send(Event::Fault(fault)).await?;
                        return Err(Stop::DecodeFailed);
                    }
                }
            }
        };

        trace!(process = %self.label, stream = %self.stream, line = *lines, "output");
        self.send(Event::Line(CategorizedLine::new(content, self.stream)))
            .await
    }

    async fn send(&mut self, event: Event) -> Result<(), Stop> {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(Stop::Cancelled),
            sent = self.sink.send_async(event) => sent.map_err(|_| Stop::Disconnected),
        }
    }

    /// Keeps the pipe flowing after a fatal decode error so the child never
    /// blocks on a full channel.
    async fn discard_remaining(&mut self) {
        let mut sink = tokio::io::sink();
        tokio::select! {
            biased;
            () = self.token.cancelled() => {}
            copied = tokio::io::copy(&mut self.reader, &mut sink) => {
                if let Ok(bytes) = copied {
                    trace!(process = %self.label, stream = %self.stream, bytes, "discarded");
                }
            }
        }
    }
}
