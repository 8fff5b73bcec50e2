// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tagged output lines.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MuxError;

/// The channel a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LineSource {
    Stdout,
    Stderr,
    /// Never produced by a drainer.
    Stdin,
}

impl LineSource {
    /// Returns the tag as printed in output (`STDOUT`, ...).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "STDOUT",
            Self::Stderr => "STDERR",
            Self::Stdin => "STDIN",
        }
    }
}

impl fmt::Display for LineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LineSource {
    type Err = MuxError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            "stdin" => Ok(Self::Stdin),
            _ => Err(MuxError::InvalidSource {
                value: s.to_string(),
            }),
        }
    }
}

/// Line payload: decoded text, or raw bytes when no encoding is configured.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum LineContent {
    Text(String),
    Bytes(Vec<u8>),
}

impl LineContent {
    /// Returns the payload as bytes, regardless of variant.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }
}

impl From<String> for LineContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for LineContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for LineContent {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// One line of child output tagged with its channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CategorizedLine {
    source: LineSource,
    content: LineContent,
}

impl CategorizedLine {
    pub fn new(content: impl Into<LineContent>, source: LineSource) -> Self {
        Self {
            source,
            content: content.into(),
        }
    }

    #[must_use]
    pub const fn source(&self) -> LineSource {
        self.source
    }

    #[must_use]
    pub const fn content(&self) -> &LineContent {
        &self.content
    }

    /// Returns the text, or `None` for raw lines.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            LineContent::Text(text) => Some(text),
            LineContent::Bytes(_) => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.content.as_bytes()
    }

    #[must_use]
    pub fn into_parts(self) -> (LineContent, LineSource) {
        (self.content, self.source)
    }
}
