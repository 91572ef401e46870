// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The pool controller: acquire/release/flush over a set of device-backed
//! frame buffers.
//!
//! ```text
//!              negotiate(cfg) ─► activate(cfg')
//!                                    │
//!   producer ──► acquire ──► FrameGuard ──► downstream ──► drop/release
//!                   ▲                                          │
//!                   │            fences resolved               ▼
//!               free list  ◄──────────────────────────  settling queue
//! ```
//!
//! The free list is FIFO: the least-recently-used buffer is handed out
//! first, which spreads GPU reuse across the widest time window and
//! keeps a just-released buffer from being reacquired before its fences
//! could realistically have resolved. Buffers whose fences are still
//! pending sit on a separate settling queue and are reclaimed lazily;
//! they never stall buffers behind them.
//!
//! All bookkeeping lives under a single mutex. Device calls (image
//! allocation and destruction) happen with the lock released, so a slow
//! device never blocks unrelated pool traffic.

use crate::config::{self, PoolConfig};
use crate::fence::{FenceTracker, GpuFence};
use crate::guard::FrameGuard;
use crate::lifecycle::{BufferState, FrameId, FrameSlot};
use crate::stats::PoolStats;
use crate::PoolError;
use image_alloc::{AllocError, AllocatedImage, ImageAllocator};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// How often blocked threads re-poll fences while buffers are settling.
const SETTLE_POLL: Duration = Duration::from_millis(5);

/// Wait slice for "infinite" waits; wakeups come from notify, this only
/// bounds a single condvar sleep.
const FOREVER_SLICE: Duration = Duration::from_secs(3600);

/// How long `acquire` may wait for a free buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireTimeout {
    /// Fail with `OutOfBuffers` instead of waiting.
    DontBlock,
    /// Wait at most this long, then fail with `Timeout`.
    Bounded(Duration),
    /// Wait until a buffer frees up, the pool flushes, or the pool dies.
    Forever,
}

/// What `deactivate` does while buffers are still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPolicy {
    /// Wait for every outstanding buffer to come home first.
    Block,
    /// Fail with `Busy` immediately.
    Fail,
}

/// Snapshot of the pool's buffer accounting.
///
/// `allocated == free + outstanding` holds after every pool operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounts {
    pub allocated: usize,
    pub free: usize,
    pub outstanding: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Inactive,
    /// Activation in progress; device allocations are running unlocked.
    Starting,
    Active,
    Flushing,
    /// Device lost. Terminal for this pool instance.
    Lost,
}

impl Lifecycle {
    fn name(self) -> &'static str {
        match self {
            Lifecycle::Inactive => "inactive",
            Lifecycle::Starting => "starting",
            Lifecycle::Active => "active",
            Lifecycle::Flushing => "flushing",
            Lifecycle::Lost => "lost",
        }
    }
}

struct PoolState {
    lifecycle: Lifecycle,
    config: Option<PoolConfig>,
    slots: Vec<FrameSlot>,
    /// FIFO of buffers available for acquire.
    free: VecDeque<FrameId>,
    /// Released buffers still gated by unresolved fences.
    settling: VecDeque<FrameId>,
    /// Buffers currently Acquired or Outstanding.
    outstanding: usize,
    /// Capacity reserved for in-flight on-demand allocations.
    pending_allocs: usize,
    /// Tickets of blocked acquirers, in arrival order.
    waiters: VecDeque<u64>,
    next_ticket: u64,
    next_generation: u64,
}

impl PoolState {
    fn can_grow(&self) -> bool {
        let max = self
            .config
            .as_ref()
            .map(|c| c.max_buffers as usize)
            .unwrap_or(0);
        max == 0 || self.slots.len() + self.pending_allocs < max
    }

    fn remove_waiter(&mut self, ticket: u64) {
        self.waiters.retain(|t| *t != ticket);
    }
}

/// Shared pool state: the target of guards' weak back-references.
pub(crate) struct PoolShared {
    allocator: ImageAllocator,
    fences: FenceTracker,
    state: Mutex<PoolState>,
    cond: Condvar,
    stats: Mutex<PoolStats>,
}

impl PoolShared {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect("pool state lock poisoned")
    }

    fn with_stats(&self, f: impl FnOnce(&mut PoolStats)) {
        let mut stats = self.stats.lock().expect("pool stats lock poisoned");
        f(&mut stats);
    }

    /// Moves settled buffers from the settling queue back onto the free
    /// list. Buffers still gated by fences keep their place; everything
    /// behind them moves independently.
    fn reclaim_settled(&self, st: &mut PoolState) -> bool {
        let mut progressed = false;
        for _ in 0..st.settling.len() {
            let id = st.settling.pop_front().expect("settling queue underflow");
            if self.fences.is_resolved(id) {
                let slot = &mut st.slots[id.index()];
                debug_assert_eq!(slot.state, BufferState::Outstanding);
                slot.state = BufferState::Free;
                st.free.push_back(id);
                st.outstanding -= 1;
                progressed = true;
                tracing::debug!(frame = %id, "fences resolved, buffer recycled");
            } else {
                st.settling.push_back(id);
            }
        }
        if progressed {
            self.cond.notify_all();
        }
        progressed
    }

    /// Marks the pool lost: terminal, every buffer invalidated.
    fn mark_lost(&self, st: &mut PoolState) {
        tracing::error!("device lost; pool is now unusable");
        st.lifecycle = Lifecycle::Lost;
        for slot in &mut st.slots {
            slot.state = BufferState::Invalid;
        }
        st.free.clear();
        st.settling.clear();
        self.fences.clear();
        self.cond.notify_all();
    }

    /// Returns a frame to the pool by identity. Called from guard drop.
    pub(crate) fn release(&self, id: FrameId, generation: u64) -> Result<(), PoolError> {
        let mut st = self.lock_state();

        let reason = match st.slots.get(id.index()) {
            None => Some("not a buffer of this pool"),
            Some(slot) if slot.generation != generation => Some("generation mismatch"),
            Some(slot) if slot.state == BufferState::Invalid => Some("buffer invalidated"),
            Some(slot) if slot.state != BufferState::Acquired => {
                Some("buffer is not acquired")
            }
            Some(_) => None,
        };
        if let Some(reason) = reason {
            self.with_stats(|s| s.record_stale_release());
            return Err(PoolError::StaleBuffer { frame: id, reason });
        }

        if self.fences.is_resolved(id) {
            let slot = &mut st.slots[id.index()];
            slot.state = BufferState::Free;
            st.free.push_back(id);
            st.outstanding -= 1;
            self.with_stats(|s| s.record_release());
            tracing::debug!(frame = %id, "buffer released to free list");
            // The head of the ticket queue takes it.
            self.cond.notify_all();
        } else {
            let slot = &mut st.slots[id.index()];
            slot.state = BufferState::Outstanding;
            st.settling.push_back(id);
            self.with_stats(|s| {
                s.record_release();
                s.record_fence_deferred();
            });
            tracing::debug!(frame = %id, "buffer released with pending fences");
        }
        Ok(())
    }

    /// Associates a fence with a currently-acquired frame.
    pub(crate) fn record_fence(
        &self,
        id: FrameId,
        generation: u64,
        fence: GpuFence,
    ) -> Result<(), PoolError> {
        let st = self.lock_state();
        match st.slots.get(id.index()) {
            Some(slot)
                if slot.generation == generation && slot.state == BufferState::Acquired =>
            {
                self.fences.record(id, fence);
                Ok(())
            }
            _ => Err(PoolError::StaleBuffer {
                frame: id,
                reason: "fence on a buffer that is not acquired",
            }),
        }
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        if let Ok(st) = self.state.get_mut() {
            let images: Vec<AllocatedImage> =
                st.slots.iter_mut().filter_map(|s| s.image.take()).collect();
            if !images.is_empty() {
                tracing::debug!(count = images.len(), "pool dropped; destroying images");
                for image in images {
                    self.allocator.free(image);
                }
            }
        }
    }
}

/// A pool of fixed-format, device-backed frame buffers.
///
/// Cheap to clone; clones share the same pool. Producers call
/// [`acquire`](FramePool::acquire), fill the frame, and hand the
/// [`FrameGuard`] downstream; consumers drop it when done. Recycling is
/// gated on the GPU fences tracked for each frame.
///
/// # Example
/// ```
/// use frame_pool::{AcquireTimeout, FramePool, PoolConfig};
/// use image_alloc::{ImageAllocator, SoftwareDevice};
/// use std::sync::Arc;
///
/// let allocator = ImageAllocator::new(Arc::new(SoftwareDevice::new()));
/// let pool = FramePool::new(allocator);
///
/// let config = pool.negotiate(&PoolConfig {
///     width: 640,
///     height: 480,
///     min_buffers: 2,
///     max_buffers: 4,
///     ..Default::default()
/// }).unwrap();
/// pool.activate(config).unwrap();
///
/// let frame = pool.acquire(AcquireTimeout::DontBlock).unwrap();
/// assert_eq!(frame.info().width, 640);
/// drop(frame); // back to the pool
/// ```
#[derive(Clone)]
pub struct FramePool {
    shared: Arc<PoolShared>,
}

impl FramePool {
    /// Creates an inactive pool over the given allocator.
    pub fn new(allocator: ImageAllocator) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                allocator,
                fences: FenceTracker::new(),
                state: Mutex::new(PoolState {
                    lifecycle: Lifecycle::Inactive,
                    config: None,
                    slots: Vec::new(),
                    free: VecDeque::new(),
                    settling: VecDeque::new(),
                    outstanding: 0,
                    pending_allocs: 0,
                    waiters: VecDeque::new(),
                    next_ticket: 0,
                    next_generation: 0,
                }),
                cond: Condvar::new(),
                stats: Mutex::new(PoolStats::default()),
            }),
        }
    }

    /// Validates `requested` against the device and returns the frozen
    /// configuration the pool would actually use.
    ///
    /// The returned config may differ (stride adjustment); activation
    /// must use it. Re-negotiating an active pool requires deactivation
    /// first.
    pub fn negotiate(&self, requested: &PoolConfig) -> Result<PoolConfig, PoolError> {
        {
            let st = self.shared.lock_state();
            match st.lifecycle {
                Lifecycle::Inactive => {}
                Lifecycle::Lost => return Err(PoolError::DeviceLost),
                other => {
                    return Err(PoolError::WrongState {
                        operation: "negotiate",
                        state: other.name(),
                    })
                }
            }
        }
        config::negotiate(&self.shared.allocator, requested)
    }

    /// Activates the pool: pre-allocates `min_buffers` and starts
    /// serving acquires.
    ///
    /// A partial allocation failure rolls back every image already
    /// allocated; the pool stays inactive.
    pub fn activate(&self, config: PoolConfig) -> Result<(), PoolError> {
        // Freeze a device-valid config even if the caller skipped
        // negotiate(); for an already-negotiated config this is a no-op.
        let config = config::negotiate(&self.shared.allocator, &config)?;

        {
            let mut st = self.shared.lock_state();
            match st.lifecycle {
                Lifecycle::Inactive => {}
                Lifecycle::Lost => return Err(PoolError::DeviceLost),
                other => {
                    return Err(PoolError::WrongState {
                        operation: "activate",
                        state: other.name(),
                    })
                }
            }
            st.lifecycle = Lifecycle::Starting;
        }

        // Device allocations happen unlocked; `Starting` guards re-entry.
        let desc = config.image_desc();
        let mut images = Vec::with_capacity(config.min_buffers as usize);
        for _ in 0..config.min_buffers {
            match self.shared.allocator.allocate(&desc) {
                Ok(image) => images.push(image),
                Err(e) => {
                    for image in images {
                        self.shared.allocator.free(image);
                    }
                    let mut st = self.shared.lock_state();
                    if matches!(e, AllocError::DeviceLost) {
                        self.shared.mark_lost(&mut st);
                        return Err(PoolError::DeviceLost);
                    }
                    st.lifecycle = Lifecycle::Inactive;
                    tracing::warn!(error = %e, "activation rolled back");
                    return Err(e.into());
                }
            }
        }

        let mut st = self.shared.lock_state();
        debug_assert_eq!(st.lifecycle, Lifecycle::Starting);
        st.slots.clear();
        st.free.clear();
        st.settling.clear();
        st.outstanding = 0;
        for image in images {
            let generation = st.next_generation;
            st.next_generation += 1;
            let id = FrameId(st.slots.len());
            st.slots.push(FrameSlot::new(image, generation));
            st.free.push_back(id);
        }
        tracing::info!(
            buffers = st.slots.len(),
            format = %config.format,
            width = config.width,
            height = config.height,
            stride = config.stride,
            "pool activated"
        );
        st.config = Some(config);
        st.lifecycle = Lifecycle::Active;
        Ok(())
    }

    /// Checks out a free buffer, growing the pool on demand up to
    /// `max_buffers`.
    ///
    /// Blocked acquirers are served in arrival order. While the pool is
    /// flushing every acquire fails immediately with
    /// [`PoolError::Flushing`].
    pub fn acquire(&self, timeout: AcquireTimeout) -> Result<FrameGuard, PoolError> {
        let deadline = match timeout {
            AcquireTimeout::Bounded(d) => Some(Instant::now() + d),
            _ => None,
        };
        let shared = &self.shared;
        let mut st = shared.lock_state();

        ensure_can_acquire(&st)?;
        shared.reclaim_settled(&mut st);

        // Fast path: nothing queued ahead of us and a buffer is free.
        if st.waiters.is_empty() {
            if let Some(id) = st.free.pop_front() {
                return Ok(self.hand_out(&mut st, id));
            }
        }

        // Nothing free: grow if the ceiling allows.
        if st.free.is_empty() && st.can_grow() {
            st = self.grow(st)?;
            ensure_can_acquire(&st)?;
            if st.waiters.is_empty() {
                if let Some(id) = st.free.pop_front() {
                    return Ok(self.hand_out(&mut st, id));
                }
            }
        }

        if timeout == AcquireTimeout::DontBlock {
            return Err(PoolError::OutOfBuffers);
        }

        // Join the FIFO wait queue.
        let ticket = st.next_ticket;
        st.next_ticket += 1;
        st.waiters.push_back(ticket);

        let result = loop {
            let now = Instant::now();
            let remaining = match deadline {
                Some(d) if now >= d => {
                    shared.with_stats(|s| s.record_timeout());
                    break Err(PoolError::Timeout);
                }
                Some(d) => d - now,
                None => FOREVER_SLICE,
            };
            // While buffers are settling on fences, wake periodically to
            // re-poll them; otherwise sleep until notified.
            let slice = if st.settling.is_empty() {
                remaining
            } else {
                SETTLE_POLL.min(remaining)
            };
            let (guard, _) = shared
                .cond
                .wait_timeout(st, slice)
                .expect("pool state lock poisoned");
            st = guard;

            match st.lifecycle {
                Lifecycle::Active => {}
                Lifecycle::Flushing => {
                    shared.with_stats(|s| s.record_flush_abort());
                    break Err(PoolError::Flushing);
                }
                Lifecycle::Lost => break Err(PoolError::DeviceLost),
                other => {
                    break Err(PoolError::WrongState {
                        operation: "acquire",
                        state: other.name(),
                    })
                }
            }

            shared.reclaim_settled(&mut st);
            if st.waiters.front() == Some(&ticket) {
                if let Some(id) = st.free.pop_front() {
                    st.waiters.pop_front();
                    if !st.free.is_empty() && !st.waiters.is_empty() {
                        shared.cond.notify_all();
                    }
                    break Ok(self.hand_out(&mut st, id));
                }
            }
        };

        if result.is_err() {
            st.remove_waiter(ticket);
            // A departing head must wake the new head.
            shared.cond.notify_all();
        }
        result
    }

    /// Returns a frame to the pool by identity.
    ///
    /// This is the path for collaborators that received the frame across
    /// a boundary the guard could not travel. Stale or foreign releases
    /// are rejected and leave the pool untouched.
    pub fn release_frame(&self, id: FrameId, generation: u64) -> Result<(), PoolError> {
        self.shared.release(id, generation)
    }

    /// Aborts all blocked acquirers and fails new ones with `Flushing`.
    ///
    /// Buffers already checked out keep their normal release path; they
    /// land back in the free list once their fences resolve and survive
    /// for the next activation cycle without reallocation.
    pub fn flush(&self) -> Result<(), PoolError> {
        let mut st = self.shared.lock_state();
        match st.lifecycle {
            Lifecycle::Active => {
                st.lifecycle = Lifecycle::Flushing;
                tracing::info!("pool flushing");
                self.shared.cond.notify_all();
                Ok(())
            }
            Lifecycle::Flushing => Ok(()),
            Lifecycle::Lost => Err(PoolError::DeviceLost),
            other => Err(PoolError::WrongState {
                operation: "flush",
                state: other.name(),
            }),
        }
    }

    /// Ends a flush and resumes normal blocking acquire behaviour.
    pub fn unflush(&self) -> Result<(), PoolError> {
        let mut st = self.shared.lock_state();
        match st.lifecycle {
            Lifecycle::Flushing => {
                st.lifecycle = Lifecycle::Active;
                tracing::info!("pool resumed after flush");
                self.shared.cond.notify_all();
                Ok(())
            }
            Lifecycle::Active => Ok(()),
            Lifecycle::Lost => Err(PoolError::DeviceLost),
            other => Err(PoolError::WrongState {
                operation: "unflush",
                state: other.name(),
            }),
        }
    }

    /// Drains outstanding buffers, destroys every image, and returns the
    /// pool to inactive.
    ///
    /// With [`DrainPolicy::Fail`] the call refuses with `Busy` while
    /// buffers are outstanding. On a lost pool this tears down what
    /// bookkeeping remains and surfaces `DeviceLost` instead of hanging.
    pub fn deactivate(&self, policy: DrainPolicy) -> Result<(), PoolError> {
        let mut st = self.shared.lock_state();
        loop {
            match st.lifecycle {
                Lifecycle::Inactive => return Ok(()),
                Lifecycle::Starting => {
                    return Err(PoolError::WrongState {
                        operation: "deactivate",
                        state: Lifecycle::Starting.name(),
                    })
                }
                Lifecycle::Lost => {
                    let images = take_images(&mut st);
                    drop(st);
                    for image in images {
                        self.shared.allocator.free(image);
                    }
                    return Err(PoolError::DeviceLost);
                }
                Lifecycle::Active | Lifecycle::Flushing => {}
            }

            self.shared.reclaim_settled(&mut st);
            let user_held = st.outstanding - st.settling.len();
            if user_held == 0 && st.pending_allocs == 0 {
                // Buffers already released but still settling are forced:
                // past this point the images are destroyed anyway, so
                // their fences no longer gate anything.
                let settling: Vec<FrameId> = st.settling.iter().copied().collect();
                for id in settling {
                    self.shared.fences.resolve_all_for(id);
                }
                self.shared.reclaim_settled(&mut st);
                break;
            }
            match policy {
                DrainPolicy::Fail => return Err(PoolError::Busy),
                DrainPolicy::Block => {
                    let (guard, _) = self
                        .shared
                        .cond
                        .wait_timeout(st, SETTLE_POLL)
                        .expect("pool state lock poisoned");
                    st = guard;
                }
            }
        }

        let images = take_images(&mut st);
        st.lifecycle = Lifecycle::Inactive;
        st.config = None;
        self.shared.fences.clear();
        self.shared.cond.notify_all();
        drop(st);

        let count = images.len();
        for image in images {
            self.shared.allocator.free(image);
        }
        tracing::info!(buffers = count, "pool deactivated");
        Ok(())
    }

    /// The frozen configuration of an activated pool.
    pub fn config(&self) -> Option<PoolConfig> {
        self.shared.lock_state().config.clone()
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.shared.lock_state().lifecycle,
            Lifecycle::Active | Lifecycle::Flushing
        )
    }

    /// Buffer accounting snapshot; `allocated == free + outstanding`.
    pub fn counts(&self) -> PoolCounts {
        let mut st = self.shared.lock_state();
        self.shared.reclaim_settled(&mut st);
        PoolCounts {
            allocated: st.slots.len(),
            free: st.free.len(),
            outstanding: st.outstanding,
        }
    }

    /// Snapshot of cumulative pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.shared
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    // ── Private helpers ────────────────────────────────────────

    /// Transitions a free slot to Acquired and builds its guard.
    fn hand_out(&self, st: &mut PoolState, id: FrameId) -> FrameGuard {
        let slot = &mut st.slots[id.index()];
        debug_assert!(slot.state.can_transition(BufferState::Acquired));
        slot.state = BufferState::Acquired;
        let image = slot.image.as_ref().expect("live slot has an image");
        let info = *image.info();
        let device_image_id = image.device_id();
        let generation = slot.generation;
        st.outstanding += 1;

        let outstanding = st.outstanding;
        self.shared.with_stats(|s| {
            s.record_acquire();
            s.update_peak_outstanding(outstanding);
        });
        tracing::debug!(frame = %id, generation, "frame acquired");
        FrameGuard::new(id, generation, info, device_image_id, Arc::downgrade(&self.shared))
    }

    /// Allocates one buffer on demand. The state lock is released around
    /// the device call; the reserved capacity keeps concurrent growers
    /// below `max_buffers`.
    fn grow<'a>(
        &'a self,
        mut st: MutexGuard<'a, PoolState>,
    ) -> Result<MutexGuard<'a, PoolState>, PoolError> {
        let desc = st
            .config
            .as_ref()
            .expect("active pool has a config")
            .image_desc();
        st.pending_allocs += 1;
        drop(st);

        let outcome = self.shared.allocator.allocate(&desc);

        let mut st = self.shared.lock_state();
        st.pending_allocs -= 1;
        match outcome {
            Ok(image) => {
                if matches!(st.lifecycle, Lifecycle::Active | Lifecycle::Flushing) {
                    let generation = st.next_generation;
                    st.next_generation += 1;
                    let id = FrameId(st.slots.len());
                    st.slots.push(FrameSlot::new(image, generation));
                    st.free.push_back(id);
                    self.shared.with_stats(|s| s.record_on_demand_allocation());
                    tracing::debug!(frame = %id, "pool grew on demand");
                    self.shared.cond.notify_all();
                } else {
                    // The pool moved on while we were allocating.
                    drop(st);
                    self.shared.allocator.free(image);
                    st = self.shared.lock_state();
                }
                Ok(st)
            }
            Err(AllocError::DeviceLost) => {
                self.shared.mark_lost(&mut st);
                Err(PoolError::DeviceLost)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.shared.lock_state();
        f.debug_struct("FramePool")
            .field("lifecycle", &st.lifecycle.name())
            .field("allocated", &st.slots.len())
            .field("free", &st.free.len())
            .field("outstanding", &st.outstanding)
            .finish()
    }
}

fn ensure_can_acquire(st: &PoolState) -> Result<(), PoolError> {
    match st.lifecycle {
        Lifecycle::Active => Ok(()),
        Lifecycle::Flushing => Err(PoolError::Flushing),
        Lifecycle::Lost => Err(PoolError::DeviceLost),
        other => Err(PoolError::WrongState {
            operation: "acquire",
            state: other.name(),
        }),
    }
}

fn take_images(st: &mut PoolState) -> Vec<AllocatedImage> {
    let images = st.slots.iter_mut().filter_map(|s| s.image.take()).collect();
    for slot in &mut st.slots {
        slot.state = BufferState::Invalid;
    }
    st.slots.clear();
    st.free.clear();
    st.settling.clear();
    st.outstanding = 0;
    images
}

#[cfg(test)]
mod tests {
    use super::*;
    use image_alloc::{ImageAllocator, PixelFormat, SoftwareDevice};

    fn test_pool(min: u32, max: u32) -> (Arc<SoftwareDevice>, FramePool) {
        let device = Arc::new(SoftwareDevice::new());
        let pool = FramePool::new(ImageAllocator::new(device.clone()));
        let config = pool
            .negotiate(&PoolConfig {
                format: PixelFormat::Rgba8,
                width: 64,
                height: 64,
                min_buffers: min,
                max_buffers: max,
                ..Default::default()
            })
            .unwrap();
        pool.activate(config).unwrap();
        (device, pool)
    }

    #[test]
    fn test_activate_preallocates_min() {
        let (_device, pool) = test_pool(3, 8);
        let counts = pool.counts();
        assert_eq!(counts.allocated, 3);
        assert_eq!(counts.free, 3);
        assert_eq!(counts.outstanding, 0);
    }

    #[test]
    fn test_acquire_before_activate_is_wrong_state() {
        let pool = FramePool::new(ImageAllocator::new(Arc::new(SoftwareDevice::new())));
        assert!(matches!(
            pool.acquire(AcquireTimeout::DontBlock),
            Err(PoolError::WrongState { .. })
        ));
    }

    #[test]
    fn test_double_activate_rejected() {
        let (_device, pool) = test_pool(1, 4);
        let err = pool.activate(pool.config().unwrap());
        assert!(matches!(err, Err(PoolError::WrongState { .. })));
    }

    #[test]
    fn test_negotiate_while_active_rejected() {
        let (_device, pool) = test_pool(1, 4);
        assert!(matches!(
            pool.negotiate(&PoolConfig::default()),
            Err(PoolError::WrongState { .. })
        ));
    }

    #[test]
    fn test_acquire_release_roundtrip() {
        let (_device, pool) = test_pool(1, 1);
        let frame = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        let (id, generation, image) =
            (frame.id(), frame.generation(), frame.device_image_id());
        drop(frame);

        // Same slot, same generation, same device allocation.
        let again = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(again.generation(), generation);
        assert_eq!(again.device_image_id(), image);
    }

    #[test]
    fn test_fifo_reuse_order() {
        let (_device, pool) = test_pool(3, 3);
        let a = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        let b = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        let c = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        let (ida, idb, idc) = (a.id(), b.id(), c.id());

        // Release out of order: b, c, a.
        drop(b);
        drop(c);
        drop(a);

        assert_eq!(pool.acquire(AcquireTimeout::DontBlock).unwrap().id(), idb);
        assert_eq!(pool.acquire(AcquireTimeout::DontBlock).unwrap().id(), idc);
        assert_eq!(pool.acquire(AcquireTimeout::DontBlock).unwrap().id(), ida);
    }

    #[test]
    fn test_on_demand_growth_respects_max() {
        let (_device, pool) = test_pool(1, 2);
        let _a = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        let _b = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        assert_eq!(pool.counts().allocated, 2);
        assert!(matches!(
            pool.acquire(AcquireTimeout::DontBlock),
            Err(PoolError::OutOfBuffers)
        ));
        assert_eq!(pool.counts().allocated, 2);
        assert_eq!(pool.stats().on_demand_allocations, 1);
    }

    #[test]
    fn test_unbounded_growth() {
        let (_device, pool) = test_pool(0, 0);
        let frames: Vec<_> = (0..16)
            .map(|_| pool.acquire(AcquireTimeout::DontBlock).unwrap())
            .collect();
        assert_eq!(pool.counts().allocated, 16);
        drop(frames);
        assert_eq!(pool.counts().free, 16);
    }

    #[test]
    fn test_nonblocking_growth_donated_to_queued_waiter() {
        let (_device, pool) = test_pool(1, 2);
        let _held = pool.acquire(AcquireTimeout::DontBlock).unwrap();

        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || {
                pool.acquire(AcquireTimeout::Bounded(Duration::from_secs(2)))
            })
        };
        // Let the waiter enqueue on the empty pool.
        std::thread::sleep(Duration::from_millis(30));

        // The non-blocking caller grows the pool, but the fresh buffer
        // belongs to the queue's head, not to the newcomer.
        assert!(matches!(
            pool.acquire(AcquireTimeout::DontBlock),
            Err(PoolError::OutOfBuffers)
        ));
        let frame = waiter
            .join()
            .expect("waiter panicked")
            .expect("waiter served from growth");
        drop(frame);
        assert_eq!(pool.counts().allocated, 2);
    }

    #[test]
    fn test_bounded_acquire_times_out() {
        let (_device, pool) = test_pool(1, 1);
        let _held = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        let start = Instant::now();
        let err = pool.acquire(AcquireTimeout::Bounded(Duration::from_millis(30)));
        assert!(matches!(err, Err(PoolError::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(pool.stats().timeouts, 1);
    }

    #[test]
    fn test_stale_release_rejected() {
        let (_device, pool) = test_pool(1, 1);
        let frame = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        let (id, generation) = (frame.id(), frame.generation());
        drop(frame);

        let before = pool.counts();
        let err = pool.release_frame(id, generation);
        assert!(matches!(err, Err(PoolError::StaleBuffer { .. })));
        assert_eq!(pool.counts(), before);
        assert_eq!(pool.stats().stale_releases, 1);
    }

    #[test]
    fn test_foreign_release_rejected() {
        let (_device, pool) = test_pool(1, 1);
        assert!(matches!(
            pool.release_frame(FrameId(42), 0),
            Err(PoolError::StaleBuffer { .. })
        ));
    }

    #[test]
    fn test_fence_defers_recycling() {
        let (_device, pool) = test_pool(1, 1);
        let frame = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        let fence = GpuFence::new();
        frame.track_fence(fence.clone()).unwrap();
        drop(frame);

        // Still outstanding: the fence has not resolved.
        let counts = pool.counts();
        assert_eq!(counts.outstanding, 1);
        assert_eq!(counts.free, 0);
        assert!(matches!(
            pool.acquire(AcquireTimeout::DontBlock),
            Err(PoolError::OutOfBuffers)
        ));

        fence.signal();
        let frame = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        assert_eq!(frame.id(), FrameId(0));
    }

    #[test]
    fn test_flush_fails_acquire_immediately() {
        let (_device, pool) = test_pool(2, 2);
        pool.flush().unwrap();
        assert!(matches!(
            pool.acquire(AcquireTimeout::Forever),
            Err(PoolError::Flushing)
        ));
        pool.unflush().unwrap();
        assert!(pool.acquire(AcquireTimeout::DontBlock).is_ok());
    }

    #[test]
    fn test_release_during_flush_keeps_buffer() {
        let (_device, pool) = test_pool(1, 1);
        let frame = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        pool.flush().unwrap();
        drop(frame);

        // Buffer came home and survives for the next cycle.
        let counts = pool.counts();
        assert_eq!(counts.free, 1);
        assert_eq!(counts.allocated, 1);
        pool.unflush().unwrap();
        assert!(pool.acquire(AcquireTimeout::DontBlock).is_ok());
    }

    #[test]
    fn test_deactivate_destroys_images() {
        let (device, pool) = test_pool(3, 8);
        assert!(device.allocated_bytes() > 0);
        pool.deactivate(DrainPolicy::Fail).unwrap();
        assert_eq!(device.allocated_bytes(), 0);
        assert_eq!(pool.counts().allocated, 0);
        assert!(!pool.is_active());
    }

    #[test]
    fn test_deactivate_busy_with_outstanding() {
        let (_device, pool) = test_pool(1, 1);
        let frame = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        assert!(matches!(
            pool.deactivate(DrainPolicy::Fail),
            Err(PoolError::Busy)
        ));
        drop(frame);
        pool.deactivate(DrainPolicy::Fail).unwrap();
    }

    #[test]
    fn test_deactivate_forces_pending_fences() {
        let (device, pool) = test_pool(1, 1);
        let frame = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        // Never signalled: teardown must not wait on it.
        frame.track_fence(GpuFence::new()).unwrap();
        drop(frame);
        pool.deactivate(DrainPolicy::Block).unwrap();
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn test_reactivate_after_deactivate() {
        let (device, pool) = test_pool(2, 4);
        pool.deactivate(DrainPolicy::Fail).unwrap();
        assert_eq!(device.allocated_bytes(), 0);

        let config = pool
            .negotiate(&PoolConfig {
                width: 32,
                height: 32,
                min_buffers: 1,
                max_buffers: 2,
                ..Default::default()
            })
            .unwrap();
        pool.activate(config).unwrap();
        let frame = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        assert_eq!(frame.info().width, 32);
    }

    #[test]
    fn test_generation_changes_across_cycles() {
        let (_device, pool) = test_pool(1, 1);
        let first_gen = pool.acquire(AcquireTimeout::DontBlock).unwrap().generation();
        pool.deactivate(DrainPolicy::Fail).unwrap();
        pool.activate(pool.negotiate(&PoolConfig {
            width: 64,
            height: 64,
            min_buffers: 1,
            max_buffers: 1,
            ..Default::default()
        }).unwrap())
        .unwrap();
        let second_gen = pool.acquire(AcquireTimeout::DontBlock).unwrap().generation();
        assert_ne!(first_gen, second_gen);
    }

    #[test]
    fn test_device_lost_is_terminal() {
        let (device, pool) = test_pool(1, 0);
        let held = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        device.lose();

        // Growth observes the loss.
        assert!(matches!(
            pool.acquire(AcquireTimeout::DontBlock),
            Err(PoolError::DeviceLost)
        ));
        // The held buffer was invalidated; its release is rejected.
        drop(held);
        assert!(matches!(
            pool.acquire(AcquireTimeout::DontBlock),
            Err(PoolError::DeviceLost)
        ));
        assert!(matches!(
            pool.deactivate(DrainPolicy::Block),
            Err(PoolError::DeviceLost)
        ));
        assert!(matches!(pool.flush(), Err(PoolError::DeviceLost)));
    }

    #[test]
    fn test_guard_outliving_pool_is_noop() {
        let (device, pool) = test_pool(1, 1);
        let frame = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        drop(pool);
        // Pool and images are gone; dropping the orphaned guard is safe.
        assert_eq!(device.allocated_bytes(), 0);
        drop(frame);
    }

    #[test]
    fn test_counts_invariant_through_operations() {
        let (_device, pool) = test_pool(2, 4);
        let check = |pool: &FramePool| {
            let c = pool.counts();
            assert_eq!(c.allocated, c.free + c.outstanding);
        };

        check(&pool);
        let a = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        check(&pool);
        let b = pool.acquire(AcquireTimeout::DontBlock).unwrap();
        check(&pool);
        let fence = GpuFence::new();
        b.track_fence(fence.clone()).unwrap();
        drop(b);
        check(&pool);
        fence.signal();
        check(&pool);
        drop(a);
        check(&pool);
    }

    #[test]
    fn test_debug_format() {
        let (_device, pool) = test_pool(1, 2);
        let debug = format!("{pool:?}");
        assert!(debug.contains("FramePool"));
        assert!(debug.contains("active"));
    }

    #[test]
    fn test_guard_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameGuard>();
        assert_send::<FramePool>();
    }
}
