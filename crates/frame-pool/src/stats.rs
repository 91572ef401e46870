// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pool usage statistics for diagnostics and tuning.
//!
//! [`PoolStats`] counts the events that matter when sizing a pool:
//! how often acquirers had to wait or grow the pool, how often releases
//! were deferred on fences, and how deep the outstanding set got.

/// Cumulative statistics about frame pool usage.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolStats {
    /// Successful acquires.
    pub acquires: u64,
    /// Successful releases (buffer returned to the pool's control).
    pub releases: u64,
    /// Buffers allocated on demand after activation.
    pub on_demand_allocations: u64,
    /// Releases that had to park the buffer on unresolved fences.
    pub fence_deferred_releases: u64,
    /// Releases rejected as stale or foreign.
    pub stale_releases: u64,
    /// Acquires that gave up on their timeout budget.
    pub timeouts: u64,
    /// Blocked acquires aborted by a flush.
    pub flush_aborted_waits: u64,
    /// High-water mark of simultaneously outstanding buffers.
    pub peak_outstanding: usize,
}

impl PoolStats {
    pub(crate) fn record_acquire(&mut self) {
        self.acquires += 1;
    }

    pub(crate) fn record_release(&mut self) {
        self.releases += 1;
    }

    pub(crate) fn record_on_demand_allocation(&mut self) {
        self.on_demand_allocations += 1;
    }

    pub(crate) fn record_fence_deferred(&mut self) {
        self.fence_deferred_releases += 1;
    }

    pub(crate) fn record_stale_release(&mut self) {
        self.stale_releases += 1;
    }

    pub(crate) fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub(crate) fn record_flush_abort(&mut self) {
        self.flush_aborted_waits += 1;
    }

    pub(crate) fn update_peak_outstanding(&mut self, outstanding: usize) {
        if outstanding > self.peak_outstanding {
            self.peak_outstanding = outstanding;
        }
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Acquires: {} ({} timeouts, {} flush-aborted), releases: {} \
             ({} fence-deferred, {} stale), {} on-demand allocations, \
             peak outstanding {}",
            self.acquires,
            self.timeouts,
            self.flush_aborted_waits,
            self.releases,
            self.fence_deferred_releases,
            self.stale_releases,
            self.on_demand_allocations,
            self.peak_outstanding,
        )
    }
}
