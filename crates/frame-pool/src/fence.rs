// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Completion tokens and the per-buffer fence tracker.
//!
//! A [`GpuFence`] stands in for a device-side completion signal: whoever
//! submitted GPU work touching a buffer creates a fence, hands a clone to
//! the pool (via [`FrameGuard::track_fence`](crate::FrameGuard::track_fence)),
//! and signals it once the submission retires. A buffer may carry several
//! pending fences at once — typically a producer write plus a consumer
//! read — and is only considered settled when every one of them has
//! resolved.
//!
//! The tracker never blocks the releasing thread: resolution is checked
//! by non-blocking polls ([`FenceTracker::is_resolved`]) or by an
//! explicitly bounded wait ([`FenceTracker::wait_until_resolved`]).

use crate::lifecycle::FrameId;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// An opaque completion token for one GPU-submitted operation.
///
/// Clonable: the submitter keeps one end to signal, the tracker keeps
/// the other to observe. Signalling is level-triggered and permanent.
#[derive(Clone)]
pub struct GpuFence {
    inner: Arc<FenceInner>,
}

struct FenceInner {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl GpuFence {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FenceInner {
                signaled: Mutex::new(false),
                cond: Condvar::new(),
            }),
        }
    }

    /// Marks the fenced operation as complete and wakes any waiters.
    pub fn signal(&self) {
        let mut signaled = self.inner.signaled.lock().expect("fence lock poisoned");
        *signaled = true;
        self.inner.cond.notify_all();
    }

    pub fn is_signaled(&self) -> bool {
        *self.inner.signaled.lock().expect("fence lock poisoned")
    }

    /// Waits up to `timeout` for the fence to signal. Returns whether it
    /// did.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.inner.signaled.lock().expect("fence lock poisoned");
        while !*signaled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout(signaled, deadline - now)
                .expect("fence lock poisoned");
            signaled = guard;
        }
        true
    }
}

impl Default for GpuFence {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuFence")
            .field("signaled", &self.is_signaled())
            .finish()
    }
}

/// A fence pending against a specific buffer.
#[derive(Debug)]
struct PendingFence {
    fence: GpuFence,
    recorded_at: Instant,
}

/// Outcome of a bounded wait on a buffer's fences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceWait {
    Resolved,
    TimedOut,
}

/// Tracks which buffers still have GPU work in flight.
///
/// Answers "is this buffer still busy?" without ever blocking a caller
/// that did not ask to wait.
#[derive(Default)]
pub struct FenceTracker {
    pending: Mutex<HashMap<FrameId, Vec<PendingFence>>>,
}

impl FenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates a completion token with a buffer.
    pub fn record(&self, frame: FrameId, fence: GpuFence) {
        let mut pending = self.pending.lock().expect("fence tracker lock poisoned");
        pending.entry(frame).or_default().push(PendingFence {
            fence,
            recorded_at: Instant::now(),
        });
    }

    /// Non-blocking poll: prunes signalled fences and reports whether
    /// the buffer has none left.
    pub fn is_resolved(&self, frame: FrameId) -> bool {
        let mut pending = self.pending.lock().expect("fence tracker lock poisoned");
        match pending.get_mut(&frame) {
            Some(fences) => {
                fences.retain(|p| !p.fence.is_signaled());
                if fences.is_empty() {
                    pending.remove(&frame);
                    true
                } else {
                    false
                }
            }
            None => true,
        }
    }

    /// Number of unresolved fences currently recorded for `frame`.
    pub fn pending_count(&self, frame: FrameId) -> usize {
        let mut pending = self.pending.lock().expect("fence tracker lock poisoned");
        match pending.get_mut(&frame) {
            Some(fences) => {
                fences.retain(|p| !p.fence.is_signaled());
                fences.len()
            }
            None => 0,
        }
    }

    /// Waits up to `timeout` for every fence on `frame` to resolve.
    ///
    /// The tracker lock is not held while waiting, so other buffers keep
    /// resolving concurrently.
    pub fn wait_until_resolved(&self, frame: FrameId, timeout: Duration) -> FenceWait {
        let deadline = Instant::now() + timeout;
        loop {
            let next = {
                let mut pending =
                    self.pending.lock().expect("fence tracker lock poisoned");
                match pending.get_mut(&frame) {
                    Some(fences) => {
                        fences.retain(|p| !p.fence.is_signaled());
                        if fences.is_empty() {
                            pending.remove(&frame);
                            None
                        } else {
                            Some(fences[0].fence.clone())
                        }
                    }
                    None => None,
                }
            };

            let Some(fence) = next else {
                return FenceWait::Resolved;
            };

            let now = Instant::now();
            if now >= deadline {
                return FenceWait::TimedOut;
            }
            fence.wait_timeout(deadline - now);
        }
    }

    /// Forcibly drops every fence recorded for `frame`.
    ///
    /// Used on teardown and device loss: from that point the GPU-side
    /// hazard is no longer the pool's concern.
    pub fn resolve_all_for(&self, frame: FrameId) {
        let mut pending = self.pending.lock().expect("fence tracker lock poisoned");
        if let Some(fences) = pending.remove(&frame) {
            let unresolved = fences.iter().filter(|p| !p.fence.is_signaled()).count();
            if unresolved > 0 {
                tracing::warn!(
                    %frame,
                    unresolved,
                    oldest_age_ms = fences
                        .iter()
                        .map(|p| p.recorded_at.elapsed().as_millis())
                        .max()
                        .unwrap_or(0),
                    "forcing unresolved fences"
                );
            }
        }
    }

    /// Drops every recorded fence for every buffer.
    pub fn clear(&self) {
        let mut pending = self.pending.lock().expect("fence tracker lock poisoned");
        pending.clear();
    }
}

impl std::fmt::Debug for FenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self.pending.lock().expect("fence tracker lock poisoned");
        f.debug_struct("FenceTracker")
            .field("buffers_pending", &pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_unknown_frame_is_resolved() {
        let tracker = FenceTracker::new();
        assert!(tracker.is_resolved(FrameId(0)));
        assert_eq!(tracker.pending_count(FrameId(0)), 0);
    }

    #[test]
    fn test_single_fence_gates() {
        let tracker = FenceTracker::new();
        let fence = GpuFence::new();
        tracker.record(FrameId(1), fence.clone());

        assert!(!tracker.is_resolved(FrameId(1)));
        fence.signal();
        assert!(tracker.is_resolved(FrameId(1)));
        // Pruned: a second poll is a cheap map miss.
        assert!(tracker.is_resolved(FrameId(1)));
    }

    #[test]
    fn test_all_fences_must_resolve() {
        let tracker = FenceTracker::new();
        let write = GpuFence::new();
        let read = GpuFence::new();
        tracker.record(FrameId(2), write.clone());
        tracker.record(FrameId(2), read.clone());
        assert_eq!(tracker.pending_count(FrameId(2)), 2);

        write.signal();
        assert!(!tracker.is_resolved(FrameId(2)));
        read.signal();
        assert!(tracker.is_resolved(FrameId(2)));
    }

    #[test]
    fn test_wait_times_out() {
        let tracker = FenceTracker::new();
        tracker.record(FrameId(3), GpuFence::new());
        let outcome = tracker.wait_until_resolved(FrameId(3), Duration::from_millis(20));
        assert_eq!(outcome, FenceWait::TimedOut);
    }

    #[test]
    fn test_wait_resolves_cross_thread() {
        let tracker = FenceTracker::new();
        let fence = GpuFence::new();
        tracker.record(FrameId(4), fence.clone());

        let signaller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            fence.signal();
        });

        let outcome = tracker.wait_until_resolved(FrameId(4), Duration::from_secs(5));
        assert_eq!(outcome, FenceWait::Resolved);
        signaller.join().unwrap();
    }

    #[test]
    fn test_resolve_all_for() {
        let tracker = FenceTracker::new();
        tracker.record(FrameId(5), GpuFence::new());
        tracker.record(FrameId(5), GpuFence::new());

        tracker.resolve_all_for(FrameId(5));
        assert!(tracker.is_resolved(FrameId(5)));
    }

    #[test]
    fn test_fence_wait_timeout_signalled_early() {
        let fence = GpuFence::new();
        fence.signal();
        assert!(fence.wait_timeout(Duration::from_millis(1)));
    }
}
