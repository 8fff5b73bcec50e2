// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Process exit detection and the process handle seam.
//!
//! ```text
//! drainer: read() == 0 ──► oracle.has_exited()?
//!                              yes ─► stop
//!                              no  ─► await oracle.exited() ─► read() again
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::sync::Notify;

use super::line::LineSource;
use crate::error::MuxError;

/// Non-blocking "has the child exited" query, shared by both drainers.
///
/// Implementations must be monotonic: once `has_exited` returns true it keeps
/// returning true.
pub trait TerminationOracle: Clone + Send + Sync + 'static {
    /// Returns whether the process has exited. Never blocks.
    fn has_exited(&self) -> bool;

    /// Resolves once the process has exited.
    ///
    /// The default polls [`has_exited`](Self::has_exited) every
    /// `poll_interval`; event-driven oracles override it.
    fn exited(&self, poll_interval: Duration) -> impl Future<Output = ()> + Send {
        let oracle = self.clone();
        async move {
            while !oracle.has_exited() {
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    /// Checked once before any drainer starts.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::OracleUnavailable`] when the oracle cannot report
    /// on the process.
    fn probe(&self) -> Result<(), MuxError> {
        Ok(())
    }
}

/// Manually set exit flag.
///
/// Useful for in-memory channels and for callers that track process exit
/// through their own means.
#[derive(Debug, Clone, Default)]
pub struct ExitFlag {
    inner: Arc<ExitFlagInner>,
}

#[derive(Debug, Default)]
struct ExitFlagInner {
    exited: AtomicBool,
    notify: Notify,
}

impl ExitFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a flag that is already set.
    #[must_use]
    pub fn already_exited() -> Self {
        let flag = Self::new();
        flag.set();
        flag
    }

    /// Marks the process as exited and wakes every waiter.
    pub fn set(&self) {
        self.inner.exited.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }
}

impl TerminationOracle for ExitFlag {
    fn has_exited(&self) -> bool {
        self.inner.exited.load(Ordering::Acquire)
    }

    fn exited(&self, _poll_interval: Duration) -> impl Future<Output = ()> + Send {
        let inner = Arc::clone(&self.inner);
        async move {
            loop {
                // Register before checking so a concurrent set() is not missed.
                let notified = inner.notify.notified();
                if inner.exited.load(Ordering::Acquire) {
                    return;
                }
                notified.await;
            }
        }
    }
}

/// A running child as seen by the multiplexer: two output channels and an
/// exit oracle.
pub trait ProcessHandle {
    type Stdout: AsyncRead + Unpin + Send + 'static;
    type Stderr: AsyncRead + Unpin + Send + 'static;
    type Oracle: TerminationOracle;

    /// Display name used in log fields.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Returns whether the channel for `stream` can still be taken.
    fn has_stream(&self, stream: LineSource) -> bool;

    fn take_stdout(&mut self) -> Option<Self::Stdout>;

    fn take_stderr(&mut self) -> Option<Self::Stderr>;

    fn oracle(&self) -> Self::Oracle;
}
