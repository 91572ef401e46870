// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks the steady-state acquire/release hot path.

use criterion::{criterion_group, criterion_main, Criterion};
use frame_pool::{AcquireTimeout, FramePool, GpuFence, PoolConfig};
use image_alloc::{ImageAllocator, PixelFormat, SoftwareDevice};
use std::sync::Arc;

fn active_pool(min: u32, max: u32) -> FramePool {
    let pool = FramePool::new(ImageAllocator::new(Arc::new(SoftwareDevice::new())));
    let config = pool
        .negotiate(&PoolConfig {
            format: PixelFormat::Rgba8,
            width: 1920,
            height: 1080,
            min_buffers: min,
            max_buffers: max,
            ..Default::default()
        })
        .expect("negotiation");
    pool.activate(config).expect("activation");
    pool
}

fn bench_acquire_release(c: &mut Criterion) {
    let pool = active_pool(4, 4);
    c.bench_function("acquire_release_uncontended", |b| {
        b.iter(|| {
            let frame = pool.acquire(AcquireTimeout::DontBlock).expect("acquire");
            std::hint::black_box(frame.info().size_bytes);
        })
    });
}

fn bench_acquire_with_fence(c: &mut Criterion) {
    let pool = active_pool(4, 4);
    c.bench_function("acquire_release_fenced", |b| {
        b.iter(|| {
            let frame = pool.acquire(AcquireTimeout::DontBlock).expect("acquire");
            let fence = GpuFence::new();
            frame.track_fence(fence.clone()).expect("fence");
            fence.signal();
            drop(frame);
        })
    });
}

fn bench_contended_acquire(c: &mut Criterion) {
    let pool = active_pool(8, 8);
    c.bench_function("acquire_release_contended_4_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let pool = pool.clone();
                    std::thread::spawn(move || {
                        for _ in 0..64 {
                            let frame =
                                pool.acquire(AcquireTimeout::Forever).expect("acquire");
                            std::hint::black_box(frame.id());
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().expect("worker");
            }
        })
    });
}

criterion_group!(
    benches,
    bench_acquire_release,
    bench_acquire_with_fence,
    bench_contended_acquire
);
criterion_main!(benches);
