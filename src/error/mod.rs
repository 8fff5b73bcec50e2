// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error handling module.
//!
//! ```text
//!            ProcmuxError (16 bytes)
//!                     |
//!   +---------+-------+-------+---------+
//!   |         |       |       |         |
//!   v         v       v       v         v
//!  Mux     Process   Lock   Config      Io
//!  Box       Box     Box     Box       Box
//!
//! Sub-errors (unboxed internally):
//!   Mux      Decode, Read, DrainerPanicked       (stream faults)
//!            MissingStream, OracleUnavailable,   (start-up)
//!            NoRuntime, UnknownEncoding, ...
//!   Process  ExecutableNotFound, SpawnFailed, StreamNotPiped, Wait,
//!            NoRuntime, SupervisorGone
//!   Lock     Timeout, Io
//!   Config   Load, InvalidValue
//! ```
//!
//! Library code returns the typed sub-errors. The binary and the config
//! loader use `anyhow` with context.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::mux::LineSource;

/// Convenience alias for `anyhow::Result`.
pub type Result<T> = anyhow::Result<T>;

/// Result type using [`ProcmuxError`].
pub type ProcmuxResult<T> = std::result::Result<T, ProcmuxError>;

/// Top-level error type.
///
/// All sub-errors are boxed to keep this enum two words wide.
#[derive(Debug, Error)]
pub enum ProcmuxError {
    /// Multiplexing failed.
    #[error("multiplexer error: {0}")]
    Mux(#[from] Box<MuxError>),

    /// Spawning or supervising a child failed.
    #[error("process error: {0}")]
    Process(#[from] Box<ProcessError>),

    /// Sentinel file lock error.
    #[error("lock error: {0}")]
    Lock(#[from] Box<LockError>),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] Box<ConfigError>),

    /// I/O error.
    #[error("io error: {0}")]
    Io(Box<std::io::Error>),
}

/// Macro to generate `From` implementations that box the source error.
macro_rules! impl_from_boxed {
    ($($error:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$error> for ProcmuxError {
                fn from(err: $error) -> Self {
                    ProcmuxError::$variant(Box::new(err))
                }
            }
        )+
    };
}

impl_from_boxed! {
    MuxError => Mux,
    ProcessError => Process,
    LockError => Lock,
    ConfigError => Config,
    std::io::Error => Io,
}

// --- Multiplexer Errors ---

/// Errors produced by the output multiplexer.
///
/// `Decode`, `Read` and `DrainerPanicked` are delivered as the final item of a
/// [`LineStream`](crate::mux::LineStream). The rest are returned when the
/// multiplexer starts, before any drainer runs.
#[derive(Debug, Error)]
pub enum MuxError {
    /// A line could not be decoded with the configured encoding.
    #[error("invalid {encoding} data on {stream} line {line}")]
    Decode {
        stream: LineSource,
        encoding: &'static str,
        line: u64,
        /// The undecodable line, as read, terminator included unless stripping is enabled.
        bytes: Vec<u8>,
    },

    /// Reading from an output channel failed.
    #[error("failed to read {stream}: {source}")]
    Read {
        stream: LineSource,
        #[source]
        source: std::io::Error,
    },

    /// The process handle no longer owns the requested output channel.
    #[error("{stream} is not available (not piped or already taken)")]
    MissingStream { stream: LineSource },

    /// The termination oracle cannot answer.
    #[error("termination oracle unavailable: {reason}")]
    OracleUnavailable { reason: String },

    /// Drainers are tokio tasks and need a runtime.
    #[error("multiplexing requires a tokio runtime")]
    NoRuntime,

    /// A drainer task panicked.
    #[error("{stream} drainer panicked: {message}")]
    DrainerPanicked { stream: LineSource, message: String },

    /// Unrecognised encoding label.
    #[error("unknown encoding '{label}'")]
    UnknownEncoding { label: String },

    /// Unrecognised line source name.
    #[error("unknown line source '{value}' (expected stdout, stderr or stdin)")]
    InvalidSource { value: String },

    /// Unrecognised decode failure policy name.
    #[error("unknown decode failure policy '{value}' (expected fail-fast, skip or replace)")]
    InvalidPolicy { value: String },
}

// --- Process Errors ---

/// Errors from the caller-side process helpers.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Executable not found in PATH.
    #[error("executable not found: '{name}' (not in PATH)")]
    ExecutableNotFound { name: String },

    /// Failed to spawn process.
    #[error("failed to spawn process '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The child was created without a piped output channel.
    #[error("process '{name}' has no piped {stream}")]
    StreamNotPiped { name: String, stream: LineSource },

    /// Waiting on the child failed.
    #[error("failed to wait for process '{name}': {source}")]
    Wait {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The supervisor task needs a tokio runtime.
    #[error("process supervision requires a tokio runtime")]
    NoRuntime,

    /// The supervisor stopped without observing an exit status.
    #[error("lost track of process '{name}' before it exited")]
    SupervisorGone { name: String },
}

// --- Lock Errors ---

/// Sentinel file lock errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// The sentinel kept existing for longer than the timeout.
    #[error("timed out after {waited:?} waiting for lock '{}'", path.display())]
    Timeout { path: PathBuf, waited: Duration },

    /// Creating or removing the sentinel failed.
    #[error("I/O error on lock '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// --- Config Errors ---

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to load or parse configuration sources.
    #[error("failed to load config: {message}")]
    Load { message: String },

    /// Invalid configuration value.
    #[error("invalid value for '{key}' in section '[{section}]': {message}")]
    InvalidValue {
        section: String,
        key: String,
        message: String,
    },
}
