// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Library root.
//!
//! # Crate Architecture
//!
//! ```text
//!                        main.rs
//!                           |
//!                +----------+----------+
//!                v                     v
//!             cli (clap)          cmd (handlers)
//!                |                 run / config
//!                +----------+----------+
//!                           v
//!              ,---------------------------,
//!              |          config           |
//!              |   TOML, env, CLI layers   |
//!              '--+-----------+--------+---'
//!                 |           |        |
//!                 v           v        v
//!              process       mux      lock
//!            spawn/supervise  |      sentinel file
//!                 |           |
//!                 +-----> ProcessHandle / TerminationOracle
//!                             |
//!                  Drainer x2 --> buffer --> LineStream
//!
//!   +-----------------------------------------+
//!   |  foundation   error, logging, utility   |
//!   +-----------------------------------------+
//! ```
//!
//! # Example
//!
//! ```no_run
//! use procmux::mux::{Multiplexer, MuxOptions, DecodeFailurePolicy};
//! use procmux::process::ProcessBuilder;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut child = ProcessBuilder::new("cargo").args(["build", "--release"]).spawn()?;
//! let options = MuxOptions::builder()
//!     .with_decode_failure(DecodeFailurePolicy::Replace)
//!     .build();
//! let mut lines = Multiplexer::new(options).multiplex_process(&mut child)?;
//! while let Some(line) = lines.next_line().await {
//!     let line = line?;
//!     print!("{}: {}", line.source(), line.as_text().unwrap_or_default());
//! }
//! let status = child.wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod lock;
pub mod logging;
pub mod mux;
pub mod process;
pub mod utility;
