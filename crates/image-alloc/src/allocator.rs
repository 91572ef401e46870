// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The image allocator: capability-checked, atomic allocation of device
//! images.
//!
//! [`ImageAllocator`] sits between the pool and the raw [`ImageDevice`].
//! It validates a description against the device capabilities, then asks
//! the device for the memory. Either a fully usable [`AllocatedImage`]
//! comes back or an error does — callers never see a half-built image.

use crate::device::{DeviceCaps, DeviceImage, ImageDevice};
use crate::format::{ImageDesc, ImageInfo};
use crate::AllocError;
use std::sync::Arc;

/// A device image together with its frozen metadata.
///
/// Exclusively owned: exactly one of {pool free list, in-flight holder}
/// has it at any time, and freeing consumes it.
#[derive(Debug)]
pub struct AllocatedImage {
    image: DeviceImage,
    info: ImageInfo,
}

impl AllocatedImage {
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    /// The device-side identity of this image.
    pub fn device_id(&self) -> u64 {
        self.image.id()
    }
}

/// Allocates and frees device images against a shared device handle.
///
/// Cloning is cheap (the device handle is shared); the allocator itself
/// is stateless beyond that handle.
#[derive(Clone)]
pub struct ImageAllocator {
    device: Arc<dyn ImageDevice>,
}

impl ImageAllocator {
    pub fn new(device: Arc<dyn ImageDevice>) -> Self {
        Self { device }
    }

    /// The capabilities of the underlying device.
    pub fn caps(&self) -> DeviceCaps {
        self.device.caps()
    }

    /// Whether the underlying device handle has become unusable.
    pub fn is_device_lost(&self) -> bool {
        self.device.is_lost()
    }

    /// Allocates an image matching `desc`.
    ///
    /// Checks the description against device capabilities before touching
    /// the device, so capability failures never consume device memory.
    pub fn allocate(&self, desc: &ImageDesc) -> Result<AllocatedImage, AllocError> {
        if self.device.is_lost() {
            return Err(AllocError::DeviceLost);
        }

        desc.validate()?;

        let caps = self.device.caps();
        if !caps.supports_format(desc.format) {
            return Err(AllocError::UnsupportedFormat(desc.format));
        }
        if desc.usage.is_empty() || !caps.supports_usage(&desc.usage) {
            return Err(AllocError::UnsupportedUsage(desc.usage));
        }
        if desc.width > caps.max_width || desc.height > caps.max_height {
            return Err(AllocError::SizeExceedsLimit {
                width: desc.width,
                height: desc.height,
                max_width: caps.max_width,
                max_height: caps.max_height,
            });
        }

        let image = self.device.create_image(desc)?;
        let info = ImageInfo::from_desc(desc);
        tracing::debug!(
            image = image.id(),
            format = %desc.format,
            width = desc.width,
            height = desc.height,
            size = info.size_bytes,
            "image allocated"
        );
        Ok(AllocatedImage { image, info })
    }

    /// Frees an allocated image, returning its memory to the device.
    pub fn free(&self, allocated: AllocatedImage) {
        tracing::debug!(image = allocated.image.id(), "image freed");
        self.device.destroy_image(allocated.image);
    }
}

impl std::fmt::Debug for ImageAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageAllocator")
            .field("device_lost", &self.device.is_lost())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareDevice;
    use crate::format::{ImageUsage, PixelFormat};

    fn allocator() -> (Arc<SoftwareDevice>, ImageAllocator) {
        let device = Arc::new(SoftwareDevice::new());
        let alloc = ImageAllocator::new(device.clone());
        (device, alloc)
    }

    fn desc(width: u32, height: u32) -> ImageDesc {
        ImageDesc {
            format: PixelFormat::Rgba8,
            width,
            height,
            stride: PixelFormat::Rgba8.min_stride(width),
            usage: ImageUsage::decode_target(),
        }
    }

    #[test]
    fn test_allocate_and_free() {
        let (device, alloc) = allocator();
        let image = alloc.allocate(&desc(64, 64)).unwrap();
        assert_eq!(image.info().size_bytes, 64 * 4 * 64);
        assert_eq!(device.allocated_bytes(), 64 * 4 * 64);

        alloc.free(image);
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn test_rejects_empty_usage() {
        let (_device, alloc) = allocator();
        let d = ImageDesc {
            usage: ImageUsage::default(),
            ..desc(64, 64)
        };
        assert!(matches!(
            alloc.allocate(&d),
            Err(AllocError::UnsupportedUsage(_))
        ));
    }

    #[test]
    fn test_rejects_oversized() {
        let (_device, alloc) = allocator();
        let d = desc(32768, 64);
        assert!(matches!(
            alloc.allocate(&d),
            Err(AllocError::SizeExceedsLimit { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_desc_before_device() {
        let (device, alloc) = allocator();
        let d = ImageDesc {
            stride: 1,
            ..desc(64, 64)
        };
        assert!(matches!(
            alloc.allocate(&d),
            Err(AllocError::InvalidDimensions(_))
        ));
        // Capability failure consumed no device memory.
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn test_lost_device() {
        let (device, alloc) = allocator();
        device.lose();
        assert!(alloc.is_device_lost());
        assert!(matches!(
            alloc.allocate(&desc(4, 4)),
            Err(AllocError::DeviceLost)
        ));
    }
}
