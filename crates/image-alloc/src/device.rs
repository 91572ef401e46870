// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The device boundary: capabilities, image handles, and the reference
//! software device.
//!
//! The pool never owns the device — it holds a shared handle supplied by
//! whoever bootstrapped the display/GPU connection. Everything the pool
//! needs from that handle is expressed by [`ImageDevice`]. When the
//! handle becomes unusable (`is_lost`), every device-touching operation
//! fails with [`AllocError::DeviceLost`] and no recovery is attempted
//! here.
//!
//! [`SoftwareDevice`] is the in-process implementation used by tests and
//! the demo CLI: plain heap memory behind a byte budget, with a switch to
//! simulate device loss.

use crate::format::{ImageDesc, ImageUsage, PixelFormat};
use crate::AllocError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Static capabilities of an image device.
#[derive(Debug, Clone)]
pub struct DeviceCaps {
    pub max_width: u32,
    pub max_height: u32,
    /// Required alignment of plane-0 row strides, in bytes.
    pub row_alignment: u32,
    /// Pixel formats the device can allocate.
    pub formats: Vec<PixelFormat>,
    /// The union of usage flags the device supports.
    pub usage: ImageUsage,
}

impl DeviceCaps {
    pub fn supports_format(&self, format: PixelFormat) -> bool {
        self.formats.contains(&format)
    }

    pub fn supports_usage(&self, usage: &ImageUsage) -> bool {
        usage.is_subset_of(&self.usage)
    }
}

/// An opaque handle to a device image allocation.
///
/// Handles are move-only: freeing consumes the handle, so an image cannot
/// be destroyed twice.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceImage {
    id: u64,
    size_bytes: usize,
}

impl DeviceImage {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}

/// The capability surface the pool requires from a device.
///
/// Implementations must be shareable across the producer and consumer
/// threads of a pipeline, hence `Send + Sync`.
pub trait ImageDevice: Send + Sync {
    /// Static device capabilities.
    fn caps(&self) -> DeviceCaps;

    /// Creates a device image matching `desc`.
    ///
    /// Either a fully usable image is returned or nothing was allocated;
    /// partially constructed images never escape.
    fn create_image(&self, desc: &ImageDesc) -> Result<DeviceImage, AllocError>;

    /// Destroys a device image, returning its memory to the device.
    fn destroy_image(&self, image: DeviceImage);

    /// Whether the underlying device handle has become unusable.
    fn is_lost(&self) -> bool;
}

/// Default software device budget: 256 MB.
const DEFAULT_BUDGET_BYTES: usize = 256 * 1024 * 1024;

/// Row alignment matching common GPU copy-pitch requirements.
const SOFTWARE_ROW_ALIGNMENT: u32 = 256;

/// An in-process device backed by plain heap memory.
///
/// Enforces a byte budget the way a real device enforces its memory
/// heaps, and exposes [`SoftwareDevice::lose`] so device-loss paths can
/// be exercised deterministically.
pub struct SoftwareDevice {
    budget_bytes: usize,
    allocated_bytes: AtomicUsize,
    next_id: AtomicU64,
    memory: Mutex<HashMap<u64, Vec<u8>>>,
    lost: AtomicBool,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::with_budget(DEFAULT_BUDGET_BYTES)
    }

    /// Creates a device with an explicit memory budget in bytes.
    pub fn with_budget(budget_bytes: usize) -> Self {
        Self {
            budget_bytes,
            allocated_bytes: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            memory: Mutex::new(HashMap::new()),
            lost: AtomicBool::new(false),
        }
    }

    /// Marks the device as lost. All subsequent allocations fail.
    pub fn lose(&self) {
        self.lost.store(true, Ordering::Release);
        tracing::warn!("software device marked lost");
    }

    /// Bytes currently allocated to live images.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.load(Ordering::Acquire)
    }

    /// Copies `data` into the image's backing memory (upload path).
    ///
    /// Returns `false` if the image is unknown or `data` overruns it.
    pub fn write_pixels(&self, image_id: u64, data: &[u8]) -> bool {
        let mut memory = self.memory.lock().expect("device memory lock poisoned");
        match memory.get_mut(&image_id) {
            Some(backing) if data.len() <= backing.len() => {
                backing[..data.len()].copy_from_slice(data);
                true
            }
            _ => false,
        }
    }

    /// Reads back the image's backing memory (present/verify path).
    pub fn read_pixels(&self, image_id: u64) -> Option<Vec<u8>> {
        let memory = self.memory.lock().expect("device memory lock poisoned");
        memory.get(&image_id).cloned()
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageDevice for SoftwareDevice {
    fn caps(&self) -> DeviceCaps {
        DeviceCaps {
            max_width: 16384,
            max_height: 16384,
            row_alignment: SOFTWARE_ROW_ALIGNMENT,
            formats: vec![
                PixelFormat::Rgba8,
                PixelFormat::Bgra8,
                PixelFormat::Gray8,
                PixelFormat::Nv12,
                PixelFormat::Yv12,
            ],
            usage: ImageUsage {
                sampled: true,
                color_attachment: true,
                transfer_src: true,
                transfer_dst: true,
            },
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<DeviceImage, AllocError> {
        if self.is_lost() {
            return Err(AllocError::DeviceLost);
        }

        let size = desc.size_bytes();
        let current = self.allocated_bytes.load(Ordering::Acquire);
        if current + size > self.budget_bytes {
            return Err(AllocError::OutOfDeviceMemory {
                requested_bytes: size,
                available_bytes: self.budget_bytes.saturating_sub(current),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut memory = self.memory.lock().expect("device memory lock poisoned");
            memory.insert(id, vec![0u8; size]);
        }
        self.allocated_bytes.fetch_add(size, Ordering::Release);

        tracing::debug!(image = id, size, "software device image created");
        Ok(DeviceImage {
            id,
            size_bytes: size,
        })
    }

    fn destroy_image(&self, image: DeviceImage) {
        let mut memory = self.memory.lock().expect("device memory lock poisoned");
        if memory.remove(&image.id).is_some() {
            self.allocated_bytes
                .fetch_sub(image.size_bytes, Ordering::Release);
            tracing::debug!(image = image.id, "software device image destroyed");
        } else {
            tracing::warn!(image = image.id, "destroy of unknown device image");
        }
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}
