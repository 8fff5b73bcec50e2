// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Output channel encodings and incremental line splitting.
//!
//! ```text
//! raw chunks --push()--> LineSplitter --next_line()--> raw line (no terminator)
//!                                      --finish()----> trailing fragment
//!
//! raw line --decode_strict()--> Some(text) | None (invalid)
//!          --decode_lossy()---> text with U+FFFD
//! ```
//!
//! Uses `encoding_rs`. UTF-16 channels split on the two-byte newline unit.

use encoding_rs::{IBM866, REPLACEMENT, UTF_8, UTF_16BE, UTF_16LE, WINDOWS_1252};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::error::MuxError;

/// How bytes read from an output channel are turned into line content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Pass bytes through untouched.
    Raw,
    /// Decode each line with the given charset.
    Text(&'static encoding_rs::Encoding),
}

impl Default for Encoding {
    fn default() -> Self {
        Self::UTF8
    }
}

impl Encoding {
    pub const UTF8: Self = Self::Text(UTF_8);
    pub const UTF16_LE: Self = Self::Text(UTF_16LE);
    /// Active Code Page, typically Windows-1252.
    pub const ACP: Self = Self::Text(WINDOWS_1252);
    /// OEM Code Page.
    pub const OEM: Self = Self::Text(IBM866);

    /// Returns the canonical name (`raw`, `UTF-8`, `windows-1252`, ...).
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Text(charset) => charset.name(),
        }
    }

    /// Returns true when lines are delivered as bytes.
    #[must_use]
    pub const fn is_raw(self) -> bool {
        matches!(self, Self::Raw)
    }

    fn code_unit(self) -> CodeUnit {
        match self {
            Self::Text(charset) if charset == UTF_16LE => CodeUnit::Utf16Le,
            Self::Text(charset) if charset == UTF_16BE => CodeUnit::Utf16Be,
            _ => CodeUnit::Byte,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = MuxError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let label = s.trim().to_ascii_lowercase();
        match label.as_str() {
            "raw" | "bytes" | "none" => Ok(Self::Raw),
            "acp" => Ok(Self::ACP),
            "oem" => Ok(Self::OEM),
            _ => encoding_rs::Encoding::for_label(label.as_bytes())
                .filter(|charset| *charset != REPLACEMENT)
                .map(Self::Text)
                .ok_or_else(|| MuxError::UnknownEncoding {
                    label: s.to_string(),
                }),
        }
    }
}

impl Serialize for Encoding {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Encoding {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}

/// Decodes `bytes` without BOM sniffing, returning `None` on malformed input.
#[must_use]
pub fn decode_strict<'a>(
    charset: &'static encoding_rs::Encoding,
    bytes: &'a [u8],
) -> Option<Cow<'a, str>> {
    charset.decode_without_bom_handling_and_without_replacement(bytes)
}

/// Decodes `bytes`, replacing malformed sequences with U+FFFD.
///
/// # Example
/// ```
/// use procmux::utility::encoding::decode_lossy;
///
/// let text = decode_lossy(encoding_rs::UTF_8, b"caf\xff");
/// assert_eq!(text, "caf\u{FFFD}");
/// ```
#[must_use]
pub fn decode_lossy<'a>(charset: &'static encoding_rs::Encoding, bytes: &'a [u8]) -> Cow<'a, str> {
    let (text, _had_errors) = charset.decode_without_bom_handling(bytes);
    text
}

/// Width of the newline code unit for an encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeUnit {
    Byte,
    Utf16Le,
    Utf16Be,
}

impl CodeUnit {
    const fn newline(self) -> &'static [u8] {
        match self {
            Self::Byte => b"\n",
            Self::Utf16Le => b"\n\0",
            Self::Utf16Be => b"\0\n",
        }
    }

    const fn carriage_return(self) -> &'static [u8] {
        match self {
            Self::Byte => b"\r",
            Self::Utf16Le => b"\r\0",
            Self::Utf16Be => b"\0\r",
        }
    }

    const fn width(self) -> usize {
        self.newline().len()
    }
}

/// Incremental line splitter over raw channel bytes.
///
/// Lines keep their terminator by default, so the bytes handed out are
/// exactly the bytes read. With [`strip_terminators`](Self::strip_terminators)
/// the newline and a `\r` directly before it are removed instead. Empty lines
/// are kept either way.
///
/// Each byte is scanned once: a line split across many chunks costs the same
/// as one delivered in a single chunk.
///
/// # Example
/// ```
/// use procmux::utility::encoding::{Encoding, LineSplitter};
///
/// let mut splitter = LineSplitter::new(Encoding::UTF8);
/// splitter.push(b"line1\r\n\nline2");
///
/// assert_eq!(splitter.next_line().as_deref(), Some(&b"line1\r\n"[..]));
/// assert_eq!(splitter.next_line().as_deref(), Some(&b"\n"[..]));
/// assert_eq!(splitter.next_line(), None);
/// assert_eq!(splitter.finish().as_deref(), Some(&b"line2"[..]));
/// ```
#[derive(Debug)]
pub struct LineSplitter {
    unit: CodeUnit,
    strip: bool,
    /// Raw bytes not yet handed out
    bytes: Vec<u8>,
    /// Offset of the first unconsumed byte
    offset: usize,
    /// Everything before this offset is known to hold no newline
    scanned: usize,
}

impl LineSplitter {
    /// Creates an empty splitter for the given encoding.
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        Self {
            unit: encoding.code_unit(),
            strip: false,
            bytes: Vec::new(),
            offset: 0,
            scanned: 0,
        }
    }

    /// Removes the line terminator (`\n` or `\r\n`) from complete lines.
    #[must_use]
    pub const fn strip_terminators(mut self, strip: bool) -> Self {
        self.strip = strip;
        self
    }

    /// Appends a chunk read from the channel.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.offset > 0 {
            self.bytes.drain(..self.offset);
            self.scanned -= self.offset;
            self.offset = 0;
        }
        self.bytes.extend_from_slice(chunk);
    }

    /// Returns the next complete line, if one is buffered.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let width = self.unit.width();
        let newline = self.unit.newline();
        let start = self.scanned.max(self.offset);
        let unscanned = &self.bytes[start..];

        let Some(index) = unscanned.chunks_exact(width).position(|unit| unit == newline) else {
            // Only whole code units are marked as scanned; a trailing half
            // unit is looked at again once the rest of it arrives.
            self.scanned = start + unscanned.len() / width * width;
            return None;
        };

        let newline_at = start + index * width;
        let end = newline_at + width;
        let mut line = &self.bytes[self.offset..end];
        if self.strip {
            line = &line[..line.len() - width];
            if line.ends_with(self.unit.carriage_return()) {
                line = &line[..line.len() - width];
            }
        }
        let line = line.to_vec();
        self.offset = end;
        self.scanned = end;
        Some(line)
    }

    /// Takes the unterminated remainder once the channel is exhausted.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.offset >= self.bytes.len() {
            self.clear();
            return None;
        }
        let rest = self.bytes[self.offset..].to_vec();
        self.clear();
        Some(rest)
    }

    /// Number of buffered bytes not yet returned as a line.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn clear(&mut self) {
        self.bytes.clear();
        self.offset = 0;
        self.scanned = 0;
    }
}
