// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Supervised child process.
//!
//! ```text
//! supervisor task
//!   select! {
//!     child.wait()     --> Exited(status)
//!     kill.cancelled() --> start_kill, child.wait() --> Exited(status)
//!   }
//!   --> watch::Sender::send_replace   (sender dropped right after)
//!
//! ExitWatch (watch::Receiver)
//!   has_exited = status published OR supervisor gone
//! ```

use std::future::Future;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, trace, warn};

use crate::error::{MuxError, ProcessError};
use crate::mux::{LineSource, ProcessHandle, TerminationOracle};

/// What the supervisor knows about the child.
#[derive(Debug, Clone)]
enum Exit {
    Running,
    Exited(ExitStatus),
    WaitFailed(Arc<io::Error>),
}

impl Exit {
    const fn is_final(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// A spawned child with piped output and a supervisor task that owns it.
#[derive(Debug)]
pub struct Subprocess {
    name: String,
    pid: Option<u32>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    exit: watch::Receiver<Exit>,
    kill: CancellationToken,
    _kill_on_drop: Option<DropGuard>,
}

impl Subprocess {
    /// Wraps a child spawned elsewhere.
    ///
    /// The child must have been created with piped stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::StreamNotPiped`] when either channel is
    /// missing and [`ProcessError::NoRuntime`] outside a tokio runtime.
    pub fn from_child(child: Child, name: impl Into<String>) -> Result<Self, ProcessError> {
        Self::supervise(child, name.into(), false)
    }

    pub(super) fn supervise(mut child: Child, name: String, kill_on_drop: bool) -> Result<Self, ProcessError> {
        let runtime = Handle::try_current().map_err(|_| ProcessError::NoRuntime)?;

        for (stream, piped) in [
            (LineSource::Stdout, child.stdout.is_some()),
            (LineSource::Stderr, child.stderr.is_some()),
        ] {
            if !piped {
                return Err(ProcessError::StreamNotPiped { name, stream });
            }
        }
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let pid = child.id();

        let (status_tx, exit) = watch::channel(Exit::Running);
        let kill = CancellationToken::new();
        runtime.spawn(supervisor(child, name.clone(), status_tx, kill.clone()));

        Ok(Self {
            name,
            pid,
            stdout,
            stderr,
            exit,
            _kill_on_drop: kill_on_drop.then(|| kill.clone().drop_guard()),
            kill,
        })
    }

    /// OS process id, if the child had not exited when it was wrapped.
    #[must_use]
    pub const fn id(&self) -> Option<u32> {
        self.pid
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns an event-driven termination oracle for this child.
    #[must_use]
    pub fn exit_watch(&self) -> ExitWatch {
        ExitWatch {
            exit: self.exit.clone(),
        }
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Asks the supervisor to kill the child. Does not wait.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Returns the exit status if the child has exited.
    #[must_use]
    pub fn try_status(&self) -> Option<ExitStatus> {
        match &*self.exit.borrow() {
            Exit::Exited(status) => Some(*status),
            Exit::Running | Exit::WaitFailed(_) => None,
        }
    }

    /// Waits for the child to exit.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Wait`] when the OS wait failed and
    /// [`ProcessError::SupervisorGone`] when the supervisor stopped without a
    /// status (runtime shutdown).
    pub async fn wait(&self) -> Result<ExitStatus, ProcessError> {
        let mut exit = self.exit.clone();
        let outcome = exit.wait_for(Exit::is_final).await.map(|exit| (*exit).clone());
        match outcome {
            Ok(Exit::Exited(status)) => Ok(status),
            Ok(Exit::WaitFailed(err)) => Err(ProcessError::Wait {
                name: self.name.clone(),
                source: io::Error::new(err.kind(), err.to_string()),
            }),
            Ok(Exit::Running) | Err(_) => Err(ProcessError::SupervisorGone {
                name: self.name.clone(),
            }),
        }
    }
}

impl ProcessHandle for Subprocess {
    type Stdout = ChildStdout;
    type Stderr = ChildStderr;
    type Oracle = ExitWatch;

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn has_stream(&self, stream: LineSource) -> bool {
        match stream {
            LineSource::Stdout => self.stdout.is_some(),
            LineSource::Stderr => self.stderr.is_some(),
            LineSource::Stdin => false,
        }
    }

    fn take_stdout(&mut self) -> Option<Self::Stdout> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<Self::Stderr> {
        self.stderr.take()
    }

    fn oracle(&self) -> Self::Oracle {
        self.exit_watch()
    }
}

async fn supervisor(mut child: Child, name: String, status: watch::Sender<Exit>, kill: CancellationToken) {
    let waited = tokio::select! {
        waited = child.wait() => waited,
        () = kill.cancelled() => {
            debug!(process = %name, "killing");
            if let Err(e) = child.start_kill() {
                warn!(process = %name, error = %e, "failed to kill process");
            }
            child.wait().await
        }
    };

    let exit = match waited {
        Ok(exit_status) => {
            trace!(process = %name, code = ?exit_status.code(), "exited");
            Exit::Exited(exit_status)
        }
        Err(e) => {
            error!(process = %name, error = %e, "failed to wait for process");
            Exit::WaitFailed(Arc::new(e))
        }
    };
    status.send_replace(exit);
}

/// [`TerminationOracle`] backed by a [`Subprocess`] supervisor.
///
/// Resolves as soon as the supervisor publishes the exit status, without
/// polling.
#[derive(Debug, Clone)]
pub struct ExitWatch {
    exit: watch::Receiver<Exit>,
}

impl ExitWatch {
    fn supervisor_gone(&self) -> bool {
        self.exit.has_changed().is_err()
    }
}

impl TerminationOracle for ExitWatch {
    fn has_exited(&self) -> bool {
        self.exit.borrow().is_final() || self.supervisor_gone()
    }

    fn exited(&self, _poll_interval: Duration) -> impl Future<Output = ()> + Send {
        let mut exit = self.exit.clone();
        async move {
            // An error means the supervisor is gone, which counts as exited.
            let _ = exit.wait_for(Exit::is_final).await;
        }
    }

    fn probe(&self) -> Result<(), MuxError> {
        if self.supervisor_gone() && !self.exit.borrow().is_final() {
            return Err(MuxError::OracleUnavailable {
                reason: "process supervisor stopped without reporting an exit status".to_string(),
            });
        }
        Ok(())
    }
}
