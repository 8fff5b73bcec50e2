// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Process builder.
//!
//! ```text
//! ProcessBuilder
//!  • new/which/raw/python/find
//!  • arg/args/cwd/env/env_clear/name/kill_on_drop
//!  • spawn() -> Subprocess
//! ```

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{OnceLock, PoisonError, RwLock};

use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{debug, trace};

use super::subprocess::Subprocess;
use crate::error::ProcessError;

/// Static cache for executable paths resolved via `which`.
static EXECUTABLE_CACHE: OnceLock<RwLock<BTreeMap<String, PathBuf>>> = OnceLock::new();

fn exe_cache() -> &'static RwLock<BTreeMap<String, PathBuf>> {
    EXECUTABLE_CACHE.get_or_init(|| RwLock::new(BTreeMap::new()))
}

/// `CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW`
#[cfg_attr(not(windows), allow(dead_code))]
pub(super) const CREATION_FLAGS: u32 = 0x0000_0200 | 0x0800_0000;

/// Builder for a child whose output will be multiplexed.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    /// Variables added on top of the inherited (or cleared) environment
    env: Vec<(OsString, OsString)>,
    env_clear: bool,
    /// Display name for logging
    name: Option<String>,
    kill_on_drop: bool,
}

impl ProcessBuilder {
    /// Creates a new `ProcessBuilder` for the given program.
    ///
    /// A bare name is resolved via PATH by the OS at spawn time.
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            env_clear: false,
            name: None,
            kill_on_drop: false,
        }
    }

    /// Creates a `ProcessBuilder` after resolving the program via PATH.
    ///
    /// Results are cached for subsequent lookups of the same program.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::ExecutableNotFound`] if the executable is not
    /// found in PATH.
    pub fn which(program: &str) -> Result<Self, ProcessError> {
        Self::find(program)
            .map(Self::new)
            .ok_or_else(|| ProcessError::ExecutableNotFound {
                name: program.to_string(),
            })
    }

    /// Finds the full path to an executable in PATH.
    ///
    /// Results are cached for subsequent lookups.
    #[must_use]
    pub fn find(program: &str) -> Option<PathBuf> {
        {
            let cache = exe_cache().read().unwrap_or_else(PoisonError::into_inner);
            if let Some(path) = cache.get(program) {
                return Some(path.clone());
            }
        }

        let path = which::which(program).ok()?;
        exe_cache()
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(program.to_string(), path.clone());
        Some(path)
    }

    /// Creates a `ProcessBuilder` from a shell command line.
    ///
    /// On Windows, this executes the command via `PowerShell` (`pwsh -NoProfile -Command`).
    /// On Unix, this executes via `/bin/sh -c`.
    pub fn raw(command: impl Into<String>) -> Self {
        let cmd = command.into();
        #[cfg(windows)]
        {
            Self::new("pwsh")
                .args(["-NoProfile", "-NonInteractive", "-Command"])
                .arg(cmd)
        }
        #[cfg(not(windows))]
        {
            Self::new("/bin/sh").arg("-c").arg(cmd)
        }
    }

    /// Creates a `ProcessBuilder` running `script` with an unbuffered Python
    /// interpreter (`python3`, falling back to `python`).
    ///
    /// The display name is the script's file stem.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::ExecutableNotFound`] if neither interpreter is
    /// in PATH.
    pub fn python(script: impl AsRef<Path>) -> Result<Self, ProcessError> {
        let script = script.as_ref();
        let interpreter = Self::find("python3")
            .or_else(|| Self::find("python"))
            .ok_or_else(|| ProcessError::ExecutableNotFound {
                name: "python3".to_string(),
            })?;
        let builder = Self::new(interpreter).arg("-u").arg(script);
        Ok(match script.file_stem() {
            Some(stem) => {
                let name = stem.to_string_lossy().into_owned();
                builder.name(name)
            }
            None => builder,
        })
    }

    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    /// Sets the working directory for the process.
    #[must_use]
    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Sets one environment variable for the process.
    #[must_use]
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Starts the process with an empty environment plus explicit `env()` entries.
    #[must_use]
    pub const fn env_clear(mut self) -> Self {
        self.env_clear = true;
        self
    }

    /// Sets a display name for logging.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Kills the child when the [`Subprocess`] is dropped.
    ///
    /// Off by default: the caller owns the child's lifecycle.
    #[must_use]
    pub const fn kill_on_drop(mut self, kill: bool) -> Self {
        self.kill_on_drop = kill;
        self
    }

    #[must_use]
    pub const fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Returns the display name for this process.
    pub(super) fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.program.file_stem().map_or_else(
                || "process".to_string(),
                |s| s.to_string_lossy().into_owned(),
            )
        })
    }

    /// Returns the full command line as a string (for logging).
    pub(super) fn command_line(&self) -> String {
        let mut cmd = self.program.display().to_string();
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.contains(' ') {
                let _ = write!(cmd, " \"{arg}\"");
            } else {
                let _ = write!(cmd, " {arg}");
            }
        }
        cmd
    }

    /// Spawns the child with piped stdout/stderr and starts its supervisor.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::NoRuntime`] outside a tokio runtime and
    /// [`ProcessError::SpawnFailed`] when the OS refuses to start the child.
    pub fn spawn(self) -> Result<Subprocess, ProcessError> {
        Handle::try_current().map_err(|_| ProcessError::NoRuntime)?;

        let name = self.display_name();
        let cmd_line = self.command_line();
        if let Some(cwd) = &self.cwd {
            debug!(cwd = %cwd.display(), "cd");
        }
        debug!(cmd = %cmd_line, "exec");

        let child = self
            .build_command()
            .spawn()
            .map_err(|source| ProcessError::SpawnFailed {
                command: cmd_line,
                source,
            })?;
        trace!(process = %name, pid = ?child.id(), "spawned");

        Subprocess::supervise(child, name, self.kill_on_drop)
    }

    fn build_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);

        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        if self.env_clear {
            command.env_clear();
        }
        command.envs(self.env.iter().map(|(k, v)| (k, v)));

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        command.creation_flags(CREATION_FLAGS);

        command
    }
}
