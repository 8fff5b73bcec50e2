// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Arguments for the `run` command.

use clap::{Args, ValueEnum};
use std::ffi::OsString;
use std::path::PathBuf;

use crate::mux::DecodeFailurePolicy;
use crate::process::ProcessBuilder;
use crate::utility::encoding::Encoding;

/// How multiplexed lines are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// `[STDOUT] line` / `[STDERR] line` on procmux's stdout
    #[default]
    Tagged,
    /// Each line on the matching stream of procmux, untagged
    Plain,
    /// One JSON object per line on procmux's stdout
    Json,
}

/// Runs a process and multiplexes its output.
#[derive(Debug, Clone, Args)]
#[command(after_help = "EXIT STATUS:\n\n\
                        The child's exit code, 128+N if it died from signal N, 1 when\n\
                        multiplexing fails, 124 on --timeout and 130 on Ctrl-C.")]
pub struct RunArgs {
    /// Encoding of the child's output (utf-8, utf-16le, latin1, acp, oem, raw, ...).
    #[arg(short = 'e', long, value_name = "LABEL")]
    pub encoding: Option<Encoding>,

    /// What to do with lines the encoding rejects (fail, skip, replace).
    #[arg(long = "on-decode-error", value_name = "POLICY")]
    pub decode_failure: Option<DecodeFailurePolicy>,

    /// Shared buffer capacity in lines (0 = unbounded).
    #[arg(long, value_name = "LINES")]
    pub buffer_capacity: Option<usize>,

    /// Output format.
    #[arg(short = 'f', long, value_enum, default_value_t)]
    pub format: OutputFormat,

    /// Runs the single COMMAND argument through the shell (`/bin/sh -c`, `pwsh -Command`).
    #[arg(long)]
    pub shell: bool,

    /// Holds the sentinel lock `<FILE>.lock` for the duration of the run.
    #[arg(long, value_name = "FILE")]
    pub lock: Option<PathBuf>,

    /// Gives up waiting for the lock after this many seconds.
    #[arg(long, value_name = "SECS", requires = "lock")]
    pub lock_timeout: Option<u64>,

    /// Kills the child after this many seconds.
    #[arg(short = 't', long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Program and arguments to run.
    #[arg(value_name = "COMMAND", required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<OsString>,
}

impl RunArgs {
    /// Converts multiplexer flags to configuration overrides.
    #[must_use]
    pub fn to_config_overrides(&self) -> Vec<(&'static str, String)> {
        let mut overrides = Vec::new();

        if let Some(encoding) = self.encoding {
            overrides.push(("mux.encoding", encoding.to_string()));
        }
        if let Some(policy) = self.decode_failure {
            overrides.push(("mux.decode_failure", policy.to_string()));
        }
        if let Some(capacity) = self.buffer_capacity {
            overrides.push(("mux.buffer_capacity", capacity.to_string()));
        }

        overrides
    }

    /// Builds the child process from the trailing command.
    #[must_use]
    pub fn process_builder(&self) -> ProcessBuilder {
        if self.shell {
            let line = self
                .command
                .iter()
                .map(|part| part.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ");
            return ProcessBuilder::raw(line);
        }

        match self.command.split_first() {
            Some((program, args)) => ProcessBuilder::new(program).args(args),
            None => ProcessBuilder::new(""),
        }
    }
}
