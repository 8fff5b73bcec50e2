// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sentinel file lock.
//!
//! ```text
//! acquire("data.csv")
//!   loop:
//!     create_new("data.csv.lock") ── ok ──────────────► FileLock
//!        │ AlreadyExists / PermissionDenied
//!        ├── waited >= timeout ──► LockError::Timeout
//!        └── sleep 10ms, retry
//! drop(FileLock) / release() ──► remove "data.csv.lock"
//! ```
//!
//! Advisory only: it excludes cooperating procmux runs, nothing else. A
//! sentinel left behind by a crashed holder has to be removed by hand.

#[cfg(test)]
mod tests;

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::OpenOptions;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::LockError;

/// Delay between attempts while the sentinel exists.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Held sentinel lock. Removes the sentinel file on drop.
#[derive(Debug)]
pub struct FileLock {
    sentinel: PathBuf,
    released: bool,
}

impl FileLock {
    /// Returns the sentinel path guarding `path` (`<path>.lock`).
    #[must_use]
    pub fn sentinel_path(path: impl AsRef<Path>) -> PathBuf {
        let mut sentinel = OsString::from(path.as_ref().as_os_str());
        sentinel.push(".lock");
        PathBuf::from(sentinel)
    }

    /// Acquires the lock guarding `path`.
    ///
    /// With `timeout = None` this waits indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] when the sentinel kept existing for the
    /// whole timeout and [`LockError::Io`] for any other creation failure.
    pub async fn acquire(path: impl AsRef<Path>, timeout: Option<Duration>) -> Result<Self, LockError> {
        let sentinel = Self::sentinel_path(path);
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&sentinel)
                .await
            {
                Ok(_) => {
                    debug!(lock = %sentinel.display(), attempts, "lock acquired");
                    return Ok(Self {
                        sentinel,
                        released: false,
                    });
                }
                Err(e) if is_contended(&e) => {
                    let waited = started.elapsed();
                    if let Some(limit) = timeout
                        && waited >= limit
                    {
                        return Err(LockError::Timeout {
                            path: sentinel,
                            waited: limit,
                        });
                    }
                    if attempts == 1 {
                        debug!(lock = %sentinel.display(), "waiting for lock");
                    }
                    trace!(lock = %sentinel.display(), attempts, "lock busy");
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(source) => {
                    return Err(LockError::Io {
                        path: sentinel,
                        source,
                    });
                }
            }
        }
    }

    /// Returns the sentinel file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.sentinel
    }

    /// Releases the lock, reporting removal failures.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] if the sentinel could not be removed.
    pub async fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        match tokio::fs::remove_file(&self.sentinel).await {
            Ok(()) => {
                debug!(lock = %self.sentinel.display(), "lock released");
                Ok(())
            }
            Err(source) => Err(LockError::Io {
                path: self.sentinel.clone(),
                source,
            }),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.sentinel) {
            Ok(()) => debug!(lock = %self.sentinel.display(), "lock released"),
            Err(e) => warn!(lock = %self.sentinel.display(), error = %e, "failed to remove lock file"),
        }
    }
}

/// Windows reports a sentinel pending deletion as access denied.
fn is_contended(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::AlreadyExists | io::ErrorKind::PermissionDenied
    )
}
