// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the frame pool.

use crate::lifecycle::FrameId;

/// Errors surfaced by pool configuration, activation, and the
/// acquire/release cycle.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The proposed configuration was rejected before activation.
    #[error("invalid pool configuration: {0}")]
    ConfigInvalid(String),

    /// The image allocator could not satisfy a request. The pool stays
    /// in its prior valid state; no partial buffers leak.
    #[error("allocation failed: {0}")]
    Allocation(#[from] image_alloc::AllocError),

    /// The operation is not valid in the pool's current lifecycle state.
    #[error("cannot {operation} while pool is {state}")]
    WrongState {
        operation: &'static str,
        state: &'static str,
    },

    /// The pool is flushing; blocking operations are aborted early.
    /// Transient — retry after `unflush`.
    #[error("pool is flushing")]
    Flushing,

    /// The caller's timeout budget elapsed before a buffer became free.
    #[error("timed out waiting for a free buffer")]
    Timeout,

    /// Non-blocking acquire found nothing free and no capacity to grow.
    #[error("no free buffers and pool is at capacity")]
    OutOfBuffers,

    /// A release did not match a currently-acquired buffer of this pool.
    /// Pool bookkeeping is unchanged.
    #[error("stale release of frame {frame}: {reason}")]
    StaleBuffer { frame: FrameId, reason: &'static str },

    /// Deactivation was refused because buffers are still outstanding.
    #[error("pool is busy: buffers still outstanding")]
    Busy,

    /// The underlying device became unusable. Terminal for this pool
    /// instance; tear it down and recreate.
    #[error("device lost")]
    DeviceLost,
}
