// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `vidpool run` command: push frames through a pooled pipeline.
//!
//! Three threads share the pool, mimicking a decode pipeline:
//! ```text
//! producer ──acquire/fill──► [channel] ──► consumer ──drop──► pool
//!                │                             ▲
//!                └── fence per frame ──► gpu thread signals ──┘
//! ```

use anyhow::Context;
use frame_pool::{AcquireTimeout, DrainPolicy, FramePool, GpuFence, PoolConfig};
use image_alloc::{ImageAllocator, ImageUsage, PixelFormat, SoftwareDevice};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[allow(clippy::too_many_arguments)]
pub fn execute(
    config_path: Option<PathBuf>,
    width: u32,
    height: u32,
    format: String,
    min_buffers: u32,
    max_buffers: u32,
    frames: usize,
    fence_latency_us: u64,
) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║            vidpool · Pipeline Runner                ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    // ── Configuration ──────────────────────────────────────────
    let requested = match config_path {
        Some(path) => PoolConfig::from_file(&path)
            .with_context(|| format!("loading pool config from {}", path.display()))?,
        None => PoolConfig {
            format: parse_format(&format)?,
            width,
            height,
            stride: 0,
            min_buffers,
            max_buffers,
            usage: ImageUsage::decode_target(),
        },
    };

    println!("  Config:");
    println!("   Format:  {}", requested.format);
    println!("   Extent:  {}x{}", requested.width, requested.height);
    println!("   Buffers: {}..{}", requested.min_buffers, max_or_inf(requested.max_buffers));
    println!();

    // ── Pool bring-up ──────────────────────────────────────────
    //
    // Step 1: negotiate the requested config against the device.
    println!("  [1/3] Negotiating pool configuration...");
    let device = Arc::new(SoftwareDevice::new());
    let pool = FramePool::new(ImageAllocator::new(device.clone()));
    let negotiated = pool.negotiate(&requested)?;
    println!(
        "        Negotiated stride: {} bytes ({} per frame)",
        negotiated.stride,
        format_bytes(negotiated.image_desc().size_bytes())
    );
    println!();

    // Step 2: activate and pre-allocate the working set.
    println!("  [2/3] Activating pool ({} buffers up front)...", negotiated.min_buffers);
    pool.activate(negotiated.clone())?;
    println!("        Pool active, {} allocated.", format_bytes(device.allocated_bytes()));
    println!();

    // Step 3: run the pipeline.
    println!("  [3/3] Running pipeline ({frames} frames)...");
    let started = Instant::now();

    let (frame_tx, frame_rx) = mpsc::channel::<frame_pool::FrameGuard>();
    let (fence_tx, fence_rx) = mpsc::channel::<GpuFence>();

    // Producer: acquire, fill, attach a write fence, send downstream.
    let producer = {
        let pool = pool.clone();
        let device = device.clone();
        let fence_tx = fence_tx.clone();
        let desc = negotiated.image_desc();
        thread::spawn(move || -> anyhow::Result<()> {
            let pixels = vec![0x7Fu8; desc.size_bytes()];
            for n in 0..frames {
                let frame = pool
                    .acquire(AcquireTimeout::Bounded(Duration::from_secs(5)))
                    .with_context(|| format!("acquiring frame {n}"))?;
                if !device.write_pixels(frame.device_image_id(), &pixels) {
                    tracing::warn!(
                        frame = %frame.id(),
                        image = frame.device_image_id(),
                        "upload rejected by device"
                    );
                }

                let write_fence = GpuFence::new();
                frame.track_fence(write_fence.clone())?;
                fence_tx.send(write_fence).context("gpu thread gone")?;
                frame_tx.send(frame).context("consumer gone")?;
            }
            Ok(())
        })
    };

    // GPU stand-in: retires each submitted fence after a fixed latency.
    let gpu = thread::spawn(move || {
        while let Ok(fence) = fence_rx.recv() {
            thread::sleep(Duration::from_micros(fence_latency_us));
            fence.signal();
        }
    });

    // Consumer: "presents" each frame, attaching a read fence so the
    // buffer is not recycled under the in-flight present.
    let consumer = {
        let device = device.clone();
        thread::spawn(move || {
            let mut consumed = 0usize;
            while let Ok(frame) = frame_rx.recv() {
                if device.read_pixels(frame.device_image_id()).is_some() {
                    consumed += 1;
                } else {
                    tracing::warn!(
                        frame = %frame.id(),
                        image = frame.device_image_id(),
                        "readback failed, image unknown to device"
                    );
                }
                let read_fence = GpuFence::new();
                if frame.track_fence(read_fence.clone()).is_ok()
                    && fence_tx.send(read_fence).is_err()
                {
                    tracing::warn!("gpu thread gone, stopping consumer");
                    break;
                }
                drop(frame);
            }
            drop(fence_tx);
            consumed
        })
    };

    producer
        .join()
        .map_err(|_| anyhow::anyhow!("producer panicked"))??;
    gpu.join().map_err(|_| anyhow::anyhow!("gpu thread panicked"))?;
    let consumed = consumer
        .join()
        .map_err(|_| anyhow::anyhow!("consumer panicked"))?;
    let elapsed = started.elapsed();

    // ── Teardown ───────────────────────────────────────────────
    pool.flush()?;
    pool.unflush()?;
    pool.deactivate(DrainPolicy::Block)?;

    println!();
    println!("  Results:");
    println!("   Frames consumed: {consumed}/{frames}");
    println!(
        "   Throughput:      {:.1} frames/s",
        consumed as f64 / elapsed.as_secs_f64()
    );
    println!();
    println!("  Pool Stats:");
    println!("   {}", pool.stats().summary());
    println!();
    println!("  Device memory after teardown: {}", format_bytes(device.allocated_bytes()));

    Ok(())
}

fn parse_format(s: &str) -> anyhow::Result<PixelFormat> {
    match s.to_ascii_lowercase().as_str() {
        "rgba8" => Ok(PixelFormat::Rgba8),
        "bgra8" => Ok(PixelFormat::Bgra8),
        "gray8" => Ok(PixelFormat::Gray8),
        "nv12" => Ok(PixelFormat::Nv12),
        "yv12" => Ok(PixelFormat::Yv12),
        other => anyhow::bail!("unknown pixel format: {other}"),
    }
}

fn max_or_inf(max: u32) -> String {
    if max == 0 {
        "∞".to_string()
    } else {
        max.to_string()
    }
}

fn format_bytes(bytes: usize) -> String {
    let mb = bytes as f64 / (1024.0 * 1024.0);
    if mb >= 1.0 {
        format!("{mb:.1} MB")
    } else {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    }
}
