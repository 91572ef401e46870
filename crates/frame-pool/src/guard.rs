// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII frame guard that returns the buffer to the pool on drop.
//!
//! A [`FrameGuard`] is the checkout half of the acquire/release protocol:
//! while it lives, its buffer is exclusively the holder's. Dropping it
//! releases the buffer; if GPU fences are still pending, the pool parks
//! the buffer until they resolve instead of recycling it immediately.
//!
//! The guard holds only a *weak* reference to the pool. A consumer that
//! outlives the pool (shutdown races) can drop its guards safely: the
//! release degrades to a no-op, because the pool owned the images and
//! already destroyed them.

use crate::fence::GpuFence;
use crate::lifecycle::FrameId;
use crate::pool::PoolShared;
use crate::PoolError;
use image_alloc::ImageInfo;
use std::sync::Weak;

/// An exclusively held frame checked out of a [`FramePool`](crate::FramePool).
pub struct FrameGuard {
    id: FrameId,
    generation: u64,
    info: ImageInfo,
    device_image_id: u64,
    pool: Weak<PoolShared>,
}

impl FrameGuard {
    pub(crate) fn new(
        id: FrameId,
        generation: u64,
        info: ImageInfo,
        device_image_id: u64,
        pool: Weak<PoolShared>,
    ) -> Self {
        Self {
            id,
            generation,
            info,
            device_image_id,
            pool,
        }
    }

    /// Identity of this frame within its pool.
    pub fn id(&self) -> FrameId {
        self.id
    }

    /// Generation stamp of the slot this frame came from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Negotiated format/extent/stride metadata of the frame.
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    /// Device-side identity of the backing image, for upload/present
    /// calls against the device.
    pub fn device_image_id(&self) -> u64 {
        self.device_image_id
    }

    /// Associates a GPU completion token with this frame.
    ///
    /// The frame will not be recycled after release until every tracked
    /// fence has been signalled. Attaching a fence to a frame whose pool
    /// is already gone is a logged no-op.
    pub fn track_fence(&self, fence: GpuFence) -> Result<(), PoolError> {
        match self.pool.upgrade() {
            Some(shared) => shared.record_fence(self.id, self.generation, fence),
            None => {
                tracing::warn!(frame = %self.id, "fence on a frame whose pool is gone");
                Ok(())
            }
        }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        match self.pool.upgrade() {
            Some(shared) => {
                if let Err(e) = shared.release(self.id, self.generation) {
                    tracing::warn!(frame = %self.id, error = %e, "release rejected");
                }
            }
            None => {
                // Pool torn down first; the images went with it.
                tracing::debug!(frame = %self.id, "dropping frame of a destroyed pool");
            }
        }
    }
}

impl std::fmt::Debug for FrameGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGuard")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("format", &self.info.format)
            .field("device_image", &self.device_image_id)
            .finish()
    }
}
