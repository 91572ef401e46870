// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `vidpool caps` command: print device capabilities and show what a
//! default pool configuration negotiates to.

use frame_pool::{FramePool, PoolConfig};
use image_alloc::{ImageAllocator, SoftwareDevice};
use std::sync::Arc;

pub fn execute() -> anyhow::Result<()> {
    let allocator = ImageAllocator::new(Arc::new(SoftwareDevice::new()));
    let caps = allocator.caps();

    println!("Device capabilities (software):");
    println!("  Max extent:    {}x{}", caps.max_width, caps.max_height);
    println!("  Row alignment: {} bytes", caps.row_alignment);
    println!("  Usage:         {}", caps.usage);
    println!("  Formats:");
    for format in &caps.formats {
        println!(
            "    {format}  ({} plane{}, {} B/px)",
            format.plane_count(),
            if format.plane_count() == 1 { "" } else { "s" },
            format.bytes_per_pixel()
        );
    }

    // Show the stride adjustment negotiation applies to a typical config.
    let requested = PoolConfig::default();
    let pool = FramePool::new(allocator);
    let negotiated = pool.negotiate(&requested)?;
    println!();
    println!(
        "Negotiated {} {}x{}: stride {} -> {} bytes, {} per frame",
        negotiated.format,
        negotiated.width,
        negotiated.height,
        requested.format.min_stride(requested.width),
        negotiated.stride,
        negotiated.image_desc().size_bytes()
    );
    Ok(())
}
