// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Utility modules.
//!
//! ```text
//! encoding
//!   Encoding        raw | encoding_rs charset, label parsing
//!   decode_strict   no BOM sniffing, no replacement
//!   LineSplitter    incremental, code-unit aware line splitting
//! ```

pub mod encoding;
