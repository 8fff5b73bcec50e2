// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! CLI module for procmux using clap derive.
//!
//! # Command Structure
//!
//! ```text
//! procmux [global options] <command>
//! run [run options] -- <program> [args...]
//! config [--files]
//! version
//! ```

pub mod global;
pub mod run;


use crate::cli::global::GlobalOptions;
use crate::cli::run::RunArgs;
use clap::{Args, Parser, Subcommand};

/// Concurrent process output multiplexer.
///
/// Runs a child process and prints its stdout and stderr as one stream of
/// tagged lines.
#[derive(Debug, Parser)]
#[command(
    name = "procmux",
    author,
    version,
    about = "Concurrent process output multiplexer",
    long_about = "procmux Copyright (C) 2026 Romeo Ahmed\n\
                  This program comes with ABSOLUTELY NO WARRANTY\n\
                  This is free software, and you are welcome to redistribute it\n\
                  under certain conditions; see LICENSE for details.\n\n\
                  Runs a child process and merges its stdout and stderr into a\n\
                  single stream of lines, each tagged with the channel it came\n\
                  from. Invoke `procmux run -- make -j8` to get started.",
    after_help = "CONFIG FILES:\n\n\
                  procmux reads `procmux.toml` from the current directory, then\n\
                  every file passed with --config, in order. PROCMUX_* environment\n\
                  variables (e.g. PROCMUX_MUX__ENCODING=latin1) override files,\n\
                  and command-line flags override everything."
)]
pub struct Cli {
    /// Global options shared by all commands
    #[command(flatten)]
    pub global: GlobalOptions,

    /// Command to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shows the version.
    #[command(visible_alias = "-v")]
    Version,

    /// Runs a process and multiplexes its output.
    Run(RunArgs),

    /// Prints the effective configuration.
    Config(ConfigArgs),
}

/// Arguments for the `config` command.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Lists the configuration files that were loaded instead of the options.
    #[arg(long)]
    pub files: bool,
}

impl Cli {
    /// Collects `key = value` configuration overrides from every flag.
    #[must_use]
    pub fn config_overrides(&self) -> Vec<(&'static str, String)> {
        let mut overrides = self.global.to_config_overrides();
        if let Some(Command::Run(args)) = &self.command {
            overrides.extend(args.to_config_overrides());
        }
        overrides
    }
}

/// Parses command-line arguments.
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}

/// Tries to parse command-line arguments, returning an error on failure.
///
/// # Errors
///
/// Returns a `clap::Error` if the arguments are invalid or if help/version information
/// was requested.
pub fn try_parse() -> Result<Cli, clap::Error> {
    Cli::try_parse()
}
