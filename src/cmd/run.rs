// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! The `run` command.
//!
//! ```text
//! [--lock] FileLock::acquire
//!     |
//! ProcessBuilder::spawn --> Subprocess
//!     |
//! Multiplexer::multiplex_process --> LineStream
//!     |
//! pump: select! { ctrl_c | timeout | next_line --> LineWriter }
//!     |
//!  Finished    --> child exit code
//!  Fault       --> kill child, error (exit 1)
//!  TimedOut    --> kill child, 124
//!  Interrupted --> kill child, 130
//! ```

use std::process::{ExitCode, ExitStatus};
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cli::run::{OutputFormat, RunArgs};
use crate::config::Config;
use crate::error::{MuxError, Result};
use crate::lock::FileLock;
use crate::mux::{CategorizedLine, LineSource, LineStream, Multiplexer};
use crate::process::Subprocess;

/// Exit code when `--timeout` fires.
pub const EXIT_TIMED_OUT: u8 = 124;
/// Exit code on Ctrl-C.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Why the output pump stopped.
#[derive(Debug)]
pub enum Ending {
    /// Every line was printed.
    Finished,
    /// The stream ended with a fault.
    Fault(MuxError),
    TimedOut,
    Interrupted,
}

/// Run the `run` command.
///
/// # Errors
///
/// Returns an error if the lock cannot be taken, the child cannot be spawned,
/// output cannot be written, or the stream ends with a fault.
pub async fn run_command(args: &RunArgs, config: &Config) -> Result<ExitCode> {
    let lock = acquire_lock(args).await?;

    let mut child = args
        .process_builder()
        .spawn()
        .context("failed to start child process")?;
    info!(process = %child.name(), pid = ?child.id(), "started");

    let token = CancellationToken::new();
    let mut lines = Multiplexer::new(config.mux_options())
        .with_cancellation(token.clone())
        .multiplex_process(&mut child)
        .context("failed to multiplex child output")?;

    let mut writer = LineWriter::new(args.format, tokio::io::stdout(), tokio::io::stderr());
    let ending = pump(&mut lines, &mut writer, args.timeout.map(Duration::from_secs)).await;
    token.cancel();

    let code = match ending {
        Ok(Ending::Finished) => {
            let status = child.wait().await?;
            info!(process = %child.name(), lines = lines.delivered(), code = ?status.code(), "finished");
            exit_code(status)
        }
        Ok(Ending::Fault(err)) => {
            stop_child(&child, "multiplexing failed").await;
            return Err(err).context("child output could not be multiplexed");
        }
        Ok(Ending::TimedOut) => {
            warn!(process = %child.name(), timeout = ?args.timeout, "timed out");
            stop_child(&child, "timed out").await;
            EXIT_TIMED_OUT
        }
        Ok(Ending::Interrupted) => {
            warn!(process = %child.name(), "interrupted");
            stop_child(&child, "interrupted").await;
            EXIT_INTERRUPTED
        }
        Err(e) => {
            stop_child(&child, "output failed").await;
            return Err(e);
        }
    };

    if let Some(lock) = lock
        && let Err(e) = lock.release().await
    {
        warn!(error = %e, "failed to release lock");
    }
    Ok(ExitCode::from(code))
}

async fn acquire_lock(args: &RunArgs) -> Result<Option<FileLock>> {
    let Some(path) = &args.lock else {
        return Ok(None);
    };
    debug!(path = %path.display(), timeout = ?args.lock_timeout, "acquiring lock");
    let lock = FileLock::acquire(path, args.lock_timeout.map(Duration::from_secs))
        .await
        .with_context(|| format!("failed to lock '{}'", path.display()))?;
    Ok(Some(lock))
}

async fn stop_child(child: &Subprocess, reason: &str) {
    debug!(process = %child.name(), reason, "killing child");
    child.kill();
    if let Err(e) = child.wait().await {
        error!(process = %child.name(), error = %e, "child did not stop");
    }
}

/// Prints lines until the stream ends, Ctrl-C arrives or `timeout` elapses.
///
/// # Errors
///
/// Returns an error if writing a line fails.
pub async fn pump<O, E>(
    lines: &mut LineStream,
    writer: &mut LineWriter<O, E>,
    timeout: Option<Duration>,
) -> Result<Ending>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut listening = true;

    let deadline = async move {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            signal = &mut interrupt, if listening => match signal {
                Ok(()) => return Ok(Ending::Interrupted),
                Err(e) => {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                    listening = false;
                }
            },
            () = &mut deadline => return Ok(Ending::TimedOut),
            item = lines.next_line() => match item {
                Some(Ok(line)) => writer.write(&line).await?,
                Some(Err(err)) => return Ok(Ending::Fault(err)),
                None => return Ok(Ending::Finished),
            },
        }
    }
}

/// Writes lines in the selected [`OutputFormat`].
pub struct LineWriter<O, E> {
    format: OutputFormat,
    out: O,
    err: E,
}

impl<O, E> LineWriter<O, E>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    pub const fn new(format: OutputFormat, out: O, err: E) -> Self {
        Self { format, out, err }
    }

    /// Writes and flushes one line.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be rendered or written.
    pub async fn write(&mut self, line: &CategorizedLine) -> Result<()> {
        let rendered = render_line(line, self.format)?;
        if self.format == OutputFormat::Plain && line.source() == LineSource::Stderr {
            self.err.write_all(&rendered).await?;
            self.err.flush().await?;
        } else {
            self.out.write_all(&rendered).await?;
            self.out.flush().await?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }
}

/// Renders one line, including its trailing newline.
///
/// `tagged` and `plain` replace the line's own terminator with `\n`; `json`
/// keeps the content verbatim.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_line(line: &CategorizedLine, format: OutputFormat) -> Result<Vec<u8>> {
    let mut rendered = match format {
        OutputFormat::Tagged => {
            let mut rendered = format!("[{}] ", line.source()).into_bytes();
            rendered.extend_from_slice(trim_terminator(line.as_bytes()));
            rendered
        }
        OutputFormat::Plain => trim_terminator(line.as_bytes()).to_vec(),
        OutputFormat::Json => serde_json::to_vec(line)?,
    };
    rendered.push(b'\n');
    Ok(rendered)
}

fn trim_terminator(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}

/// Maps the child's exit status to procmux's exit code.
///
/// Codes outside 0-255 become 1. On Unix a death by signal N becomes 128+N.
#[must_use]
pub fn exit_code(status: ExitStatus) -> u8 {
    if let Some(code) = status.code() {
        return u8::try_from(code).unwrap_or(1);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return u8::try_from(128 + signal).unwrap_or(1);
        }
    }
    1
}
