// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Consumer side of the shared buffer.
//!
//! ```text
//! Streaming ──(buffer disconnected and empty)──► Joining ──► Done
//!     │  Line         ──► yield Ok(line)
//!     │  Read fault   ──► hold (first one wins), sibling keeps draining
//!     │  Decode fault ──► hold, cancel drainers ──► Settling
//!     └─ cancelled ──────────────────────────────────────► Done
//! Settling: yield lines already buffered, then Joining
//! Joining: collect drainer panics, then yield the held fault (if any)
//! ```

use std::any::Any;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures_util::stream::FusedStream;
use futures_util::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFutureOwned};
use tracing::{debug, warn};

use super::buffer::Event;
use super::line::{CategorizedLine, LineSource};
use crate::error::MuxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Streaming,
    /// A decode fault stopped the drainers; flushing what they left behind.
    Settling,
    Joining,
    Done,
}

/// Lazy, single-pass sequence of the child's output lines.
///
/// Ends once both drainers have stopped and every buffered line has been
/// yielded. A drainer fault is yielded as the last item. A decode fault stops
/// both drainers at once, so it follows only the lines already buffered and
/// never waits for the sibling channel to close. A read fault lets the
/// sibling drain to its end first. Dropping the stream cancels both drainers;
/// the child process itself is never touched.
pub struct LineStream {
    events: flume::r#async::RecvStream<'static, Event>,
    drainers: Vec<(LineSource, JoinHandle<()>)>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    token: CancellationToken,
    _guard: DropGuard,
    held_fault: Option<MuxError>,
    state: State,
    label: Arc<str>,
    delivered: u64,
}

impl LineStream {
    pub(super) fn new(
        events: flume::Receiver<Event>,
        drainers: Vec<(LineSource, JoinHandle<()>)>,
        token: CancellationToken,
        label: Arc<str>,
    ) -> Self {
        Self {
            events: events.into_stream(),
            drainers,
            cancelled: Box::pin(token.clone().cancelled_owned()),
            _guard: token.clone().drop_guard(),
            token,
            held_fault: None,
            state: State::Streaming,
            label,
            delivered: 0,
        }
    }

    /// Waits for the next line.
    ///
    /// Returns `None` once the stream has ended.
    pub async fn next_line(&mut self) -> Option<Result<CategorizedLine, MuxError>> {
        self.next().await
    }

    /// Consumes the stream, collecting every line.
    ///
    /// # Errors
    ///
    /// Returns the terminal fault of the stream, if any. Lines collected
    /// before the fault are discarded; iterate with
    /// [`next_line`](Self::next_line) to keep them.
    pub async fn collect_lines(mut self) -> Result<Vec<CategorizedLine>, MuxError> {
        let mut lines = Vec::new();
        while let Some(item) = self.next().await {
            lines.push(item?);
        }
        Ok(lines)
    }

    /// Stops both drainers and ends the stream early.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of lines yielded so far.
    #[must_use]
    pub const fn delivered(&self) -> u64 {
        self.delivered
    }

    fn hold(&mut self, fault: MuxError) {
        if self.held_fault.is_none() {
            debug!(process = %self.label, error = %fault, "drainer fault held until buffer drains");
            self.held_fault = Some(fault);
        } else {
            warn!(process = %self.label, error = %fault, "additional drainer fault discarded");
        }
    }

    fn poll_join(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        while let Some((stream, handle)) = self.drainers.first_mut() {
            let stream = *stream;
            let joined = ready!(Pin::new(handle).poll(cx));
            self.drainers.remove(0);
            if let Err(err) = joined
                && err.is_panic()
            {
                let message = panic_message(err.into_panic());
                self.hold(MuxError::DrainerPanicked { stream, message });
            }
        }
        Poll::Ready(())
    }
}

impl Stream for LineStream {
    type Item = Result<CategorizedLine, MuxError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            match this.state {
                State::Done => return Poll::Ready(None),
                State::Streaming => {
                    if this.cancelled.as_mut().poll(cx).is_ready() {
                        debug!(process = %this.label, delivered = this.delivered, "stream cancelled");
                        this.state = State::Done;
                        return Poll::Ready(None);
                    }
                    match ready!(this.events.poll_next_unpin(cx)) {
                        Some(Event::Line(line)) => {
                            this.delivered += 1;
                            return Poll::Ready(Some(Ok(line)));
                        }
                        Some(Event::Fault(fault)) => {
                            let settle = matches!(fault, MuxError::Decode { .. });
                            this.hold(fault);
                            if settle {
                                debug!(process = %this.label, "decode fault, stopping drainers");
                                this.token.cancel();
                                this.state = State::Settling;
                            }
                        }
                        None => this.state = State::Joining,
                    }
                }
                State::Settling => match ready!(this.events.poll_next_unpin(cx)) {
                    Some(Event::Line(line)) => {
                        this.delivered += 1;
                        return Poll::Ready(Some(Ok(line)));
                    }
                    Some(Event::Fault(fault)) => this.hold(fault),
                    None => this.state = State::Joining,
                },
                State::Joining => {
                    ready!(this.poll_join(cx));
                    this.state = State::Done;
                    debug!(process = %this.label, delivered = this.delivered, "stream finished");
                    return Poll::Ready(this.held_fault.take().map(Err));
                }
            }
        }
    }
}

impl FusedStream for LineStream {
    fn is_terminated(&self) -> bool {
        self.state == State::Done
    }
}

impl std::fmt::Debug for LineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineStream")
            .field("label", &self.label)
            .field("state", &self.state)
            .field("delivered", &self.delivered)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
