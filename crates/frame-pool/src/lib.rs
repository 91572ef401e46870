// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Frame buffer pool for video pipelines.
//!
//! Rendering and decode pipelines burn through frame-sized device images
//! at a steady rate; allocating each one fresh is slow and fragments
//! device memory. This crate pools them: a fixed image configuration is
//! negotiated against the device once, a working set is pre-allocated,
//! and frames are checked out and recycled from then on. Recycling is
//! gated on GPU fences, so a buffer is never handed back out while the
//! device may still be reading it.
//!
//! # Key Components
//!
//! - [`FramePool`]: the pool itself. Clone-cheap handle over shared
//!   state; negotiate, activate, acquire, flush, deactivate.
//! - [`FrameGuard`]: RAII handle to a checked-out frame. Dropping it
//!   returns the frame to the pool.
//! - [`GpuFence`] / fence tracking: per-frame completion gates recorded
//!   via [`FrameGuard::track_fence`].
//! - [`PoolConfig`]: the negotiated image format, extent, stride, and
//!   buffer count bounds. Loadable from TOML.
//! - [`PoolStats`]: cumulative counters for observability.
//!
//! # Ownership Model
//!
//! ```text
//!   FramePool ──► Arc<shared state> ◄── Weak ── FrameGuard
//!                      │
//!                      ├── slots[]: device images + per-slot state
//!                      ├── free list (FIFO) / settling queue
//!                      └── fence tracker
//! ```
//!
//! Guards hold only a weak back-reference: a guard that outlives its
//! pool degrades to an inert token instead of keeping device memory
//! alive.
//!
//! # Example
//!
//! ```
//! use frame_pool::{AcquireTimeout, DrainPolicy, FramePool, GpuFence, PoolConfig};
//! use image_alloc::{ImageAllocator, SoftwareDevice};
//! use std::sync::Arc;
//!
//! let allocator = ImageAllocator::new(Arc::new(SoftwareDevice::new()));
//! let pool = FramePool::new(allocator);
//! let config = pool.negotiate(&PoolConfig::default()).unwrap();
//! pool.activate(config).unwrap();
//!
//! let frame = pool.acquire(AcquireTimeout::Forever).unwrap();
//! let fence = GpuFence::new();
//! frame.track_fence(fence.clone()).unwrap();
//! drop(frame); // recycled once the fence signals
//! fence.signal();
//!
//! pool.deactivate(DrainPolicy::Block).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod fence;
pub mod guard;
pub mod lifecycle;
pub mod pool;
pub mod stats;

pub use config::PoolConfig;
pub use error::PoolError;
pub use fence::{FenceTracker, FenceWait, GpuFence};
pub use guard::FrameGuard;
pub use lifecycle::{BufferState, FrameId};
pub use pool::{AcquireTimeout, DrainPolicy, FramePool, PoolCounts};
pub use stats::PoolStats;
