// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Spawning and supervising children for the multiplexer.
//!
//! ```text
//! ProcessBuilder::new("cmake")
//!   .args() .cwd() .env() .name()
//!   .spawn()
//!       --> tokio::process::Command (stdout/stderr piped, stdin null)
//!       --> Subprocess
//!             take_stdout / take_stderr    (ProcessHandle)
//!             exit_watch() -> ExitWatch    (TerminationOracle)
//!             supervisor task:  child.wait()  |  kill()
//!                                   \           /
//!                            watch<exit status>
//! ```

mod builder;
mod subprocess;

pub use builder::ProcessBuilder;
pub use subprocess::{ExitWatch, Subprocess};
