// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Configuration sections.
//!
//! ```text
//! Config
//!   [mux]  MuxConfig    encoding, decode_failure, buffer_capacity, exit_poll_ms,
//!                       strip_terminators
//!   [log]  LogSettings  level, file_level, file
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::logging::LogLevel;
use crate::mux::{BufferPolicy, DEFAULT_EXIT_POLL, DecodeFailurePolicy, MuxOptions};
use crate::utility::encoding::Encoding;

/// `[mux]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MuxConfig {
    /// Encoding label for both channels (`raw` disables decoding).
    pub encoding: Encoding,
    /// Policy for lines the encoding rejects.
    pub decode_failure: DecodeFailurePolicy,
    /// Shared buffer capacity in lines (0 = unbounded).
    pub buffer_capacity: usize,
    /// Exit poll interval for polling oracles, in milliseconds.
    pub exit_poll_ms: u64,
    /// Remove line terminators from line content.
    pub strip_terminators: bool,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            encoding: Encoding::UTF8,
            decode_failure: DecodeFailurePolicy::FailFast,
            buffer_capacity: 0,
            exit_poll_ms: u64::try_from(DEFAULT_EXIT_POLL.as_millis()).unwrap_or(10),
            strip_terminators: false,
        }
    }
}

impl MuxConfig {
    /// Converts the section into multiplexer options.
    #[must_use]
    pub fn to_options(&self) -> MuxOptions {
        MuxOptions::builder()
            .with_encoding(self.encoding)
            .with_decode_failure(self.decode_failure)
            .with_buffer(BufferPolicy::from_capacity(self.buffer_capacity))
            .with_exit_poll_interval(Duration::from_millis(self.exit_poll_ms))
            .with_strip_terminators(self.strip_terminators)
            .build()
    }
}

/// `[log]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    /// Console log level (0-6).
    pub level: LogLevel,
    /// Log file level (0-6).
    pub file_level: LogLevel,
    /// Optional log file path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::INFO,
            file_level: LogLevel::TRACE,
            file: None,
        }
    }
}
