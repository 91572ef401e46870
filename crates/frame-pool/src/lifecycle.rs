// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-buffer lifecycle state.
//!
//! ```text
//!            acquire
//!   Free ──────────────► Acquired
//!    ▲                       │ release
//!    │   fences resolved     ▼
//!    └─────────────── Outstanding
//!
//!   any state ──► Invalid   (pool destroyed / device lost; terminal)
//! ```
//!
//! Only `acquire`, `release`, and fence resolution move a buffer between
//! states; nothing else touches them. A release with no pending fences
//! shortcuts `Acquired → Free` directly.

use image_alloc::AllocatedImage;
use std::fmt;

/// Identity of a buffer slot within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub(crate) usize);

impl FrameId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// Lifecycle state of a single pooled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// In the pool's free list, available for acquire.
    Free,
    /// Handed to a caller; the pool has no access to its memory.
    Acquired,
    /// Returned by the caller, but GPU work is still in flight.
    Outstanding,
    /// The allocation is gone (pool destroyed, device reset). Terminal.
    Invalid,
}

impl BufferState {
    /// Whether moving from `self` to `to` is a legal transition.
    pub fn can_transition(self, to: BufferState) -> bool {
        use BufferState::*;
        match (self, to) {
            (Free, Acquired) => true,
            (Acquired, Outstanding) => true,
            (Acquired, Free) => true, // release with no pending fences
            (Outstanding, Free) => true,
            (_, Invalid) => self != Invalid,
            _ => false,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferState::Free => "free",
            BufferState::Acquired => "acquired",
            BufferState::Outstanding => "outstanding",
            BufferState::Invalid => "invalid",
        }
    }
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A buffer slot owned by the pool: the image, its lifecycle state, and
/// the generation stamp of this allocation.
#[derive(Debug)]
pub(crate) struct FrameSlot {
    /// `None` only after the image has been handed back to the
    /// allocator during teardown.
    pub image: Option<AllocatedImage>,
    pub state: BufferState,
    /// Stamp of the allocation living in this slot. Stable across normal
    /// reuse; a new stamp means the slot was re-created and old
    /// references to it are stale.
    pub generation: u64,
}

impl FrameSlot {
    pub fn new(image: AllocatedImage, generation: u64) -> Self {
        Self {
            image: Some(image),
            state: BufferState::Free,
            generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BufferState::*;

    #[test]
    fn test_legal_transitions() {
        assert!(Free.can_transition(Acquired));
        assert!(Acquired.can_transition(Free));
        assert!(Acquired.can_transition(Outstanding));
        assert!(Outstanding.can_transition(Free));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!Free.can_transition(Outstanding));
        assert!(!Free.can_transition(Free));
        assert!(!Outstanding.can_transition(Acquired));
        assert!(!Acquired.can_transition(Acquired));
    }

    #[test]
    fn test_invalid_is_terminal() {
        assert!(Free.can_transition(Invalid));
        assert!(Acquired.can_transition(Invalid));
        assert!(Outstanding.can_transition(Invalid));
        assert!(!Invalid.can_transition(Free));
        assert!(!Invalid.can_transition(Acquired));
        assert!(!Invalid.can_transition(Invalid));
    }

    #[test]
    fn test_display() {
        assert_eq!(FrameId(3).to_string(), "frame#3");
        assert_eq!(Outstanding.to_string(), "outstanding");
    }
}
