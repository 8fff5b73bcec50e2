// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! The shared buffer between the drainers and the consumer.
//!
//! A flume channel: each drainer owns a `Sender`, the stream owns the
//! `Receiver`. Disconnection (both senders dropped) with an empty queue is
//! the "both drainers stopped and buffer drained" condition.

use std::num::NonZeroUsize;

use super::line::CategorizedLine;
use crate::error::MuxError;

/// What travels through the shared buffer.
#[derive(Debug)]
pub(super) enum Event {
    Line(CategorizedLine),
    /// Terminal fault of one drainer, reported after all lines.
    Fault(MuxError),
}

/// Capacity policy of the shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferPolicy {
    /// Never blocks producers. A very chatty child with a slow consumer grows
    /// memory without limit.
    #[default]
    Unbounded,
    /// Producers wait for free slots. A consumer that stops polling will
    /// eventually stall the child once the OS pipe buffers fill up.
    Bounded { capacity: NonZeroUsize },
}

impl BufferPolicy {
    /// Maps a configured capacity to a policy (`0` = unbounded).
    #[must_use]
    pub const fn from_capacity(capacity: usize) -> Self {
        match NonZeroUsize::new(capacity) {
            Some(capacity) => Self::Bounded { capacity },
            None => Self::Unbounded,
        }
    }

    /// Returns the configured capacity (`0` = unbounded).
    #[must_use]
    pub const fn capacity(&self) -> usize {
        match self {
            Self::Unbounded => 0,
            Self::Bounded { capacity } => capacity.get(),
        }
    }
}

pub(super) fn shared_buffer(policy: BufferPolicy) -> (flume::Sender<Event>, flume::Receiver<Event>) {
    match policy {
        BufferPolicy::Unbounded => flume::unbounded(),
        BufferPolicy::Bounded { capacity } => flume::bounded(capacity.get()),
    }
}
