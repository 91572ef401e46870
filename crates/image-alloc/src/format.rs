// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pixel formats, usage flags, and image descriptions.
//!
//! An [`ImageDesc`] is the input to allocation: it pins format, extent,
//! row stride and intended usage. The matching [`ImageInfo`] is the frozen
//! metadata of an image that was actually allocated. Formats know their
//! own plane layout, so total byte sizes are computed here and nowhere
//! else.

use crate::AllocError;
use std::fmt;

/// Pixel formats the allocator understands.
///
/// The packed formats (`Rgba8`, `Bgra8`, `Gray8`) occupy a single plane.
/// `Nv12` is two-plane (luma + interleaved chroma at half vertical
/// resolution); `Yv12` is three-plane with both chroma planes subsampled
/// in each dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    Gray8,
    Nv12,
    Yv12,
}

impl PixelFormat {
    /// Number of memory planes for this format.
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 | PixelFormat::Gray8 => 1,
            PixelFormat::Nv12 => 2,
            PixelFormat::Yv12 => 3,
        }
    }

    /// Bytes per pixel in plane 0.
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
            PixelFormat::Gray8 | PixelFormat::Nv12 | PixelFormat::Yv12 => 1,
        }
    }

    /// Whether the chroma planes are subsampled (requires even extents).
    pub fn is_subsampled(&self) -> bool {
        matches!(self, PixelFormat::Nv12 | PixelFormat::Yv12)
    }

    /// Minimum plane-0 row stride in bytes for the given width.
    pub fn min_stride(&self, width: u32) -> u32 {
        width * self.bytes_per_pixel()
    }

    /// Total image size in bytes for the given extent and plane-0 stride.
    ///
    /// Chroma planes inherit their stride from plane 0 (`Nv12` shares it,
    /// `Yv12` halves it), which matches how the stride is negotiated.
    pub fn image_size(&self, height: u32, stride: u32) -> usize {
        let luma = stride as usize * height as usize;
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 | PixelFormat::Gray8 => luma,
            PixelFormat::Nv12 => luma + stride as usize * (height / 2) as usize,
            PixelFormat::Yv12 => {
                luma + 2 * ((stride / 2) as usize * (height / 2) as usize)
            }
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Rgba8 => "RGBA8",
            PixelFormat::Bgra8 => "BGRA8",
            PixelFormat::Gray8 => "GRAY8",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Yv12 => "YV12",
        };
        write!(f, "{name}")
    }
}

/// How an allocated image will be used by the device.
///
/// At least one flag must be set for an allocation to make sense.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(default)]
pub struct ImageUsage {
    /// The image is sampled by shaders (read by the display path).
    pub sampled: bool,
    /// The image is rendered into as a color attachment.
    pub color_attachment: bool,
    /// The image is a source of transfer (copy/blit) operations.
    pub transfer_src: bool,
    /// The image is a destination of transfer operations (upload target).
    pub transfer_dst: bool,
}

impl ImageUsage {
    /// The typical decode-target usage: uploaded to, then sampled.
    pub fn decode_target() -> Self {
        Self {
            sampled: true,
            transfer_dst: true,
            ..Self::default()
        }
    }

    /// Usage for images rendered into and then presented.
    pub fn render_target() -> Self {
        Self {
            sampled: true,
            color_attachment: true,
            ..Self::default()
        }
    }

    /// True when no flag is set. Such a usage is rejected at allocation.
    pub fn is_empty(&self) -> bool {
        !(self.sampled || self.color_attachment || self.transfer_src || self.transfer_dst)
    }

    /// True when `self` requests nothing beyond what `other` provides.
    pub fn is_subset_of(&self, other: &ImageUsage) -> bool {
        (!self.sampled || other.sampled)
            && (!self.color_attachment || other.color_attachment)
            && (!self.transfer_src || other.transfer_src)
            && (!self.transfer_dst || other.transfer_dst)
    }
}

impl fmt::Display for ImageUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::new();
        if self.sampled {
            flags.push("sampled");
        }
        if self.color_attachment {
            flags.push("color-attachment");
        }
        if self.transfer_src {
            flags.push("transfer-src");
        }
        if self.transfer_dst {
            flags.push("transfer-dst");
        }
        if flags.is_empty() {
            write!(f, "(none)")
        } else {
            write!(f, "{}", flags.join("+"))
        }
    }
}

/// A request to allocate a device image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Plane-0 row stride in bytes. Must be at least the format minimum.
    pub stride: u32,
    pub usage: ImageUsage,
}

impl ImageDesc {
    /// Total allocation size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.format.image_size(self.height, self.stride)
    }

    /// Checks internal consistency: nonzero extent, even dimensions for
    /// subsampled formats, stride at least the format minimum.
    pub fn validate(&self) -> Result<(), AllocError> {
        if self.width == 0 || self.height == 0 {
            return Err(AllocError::InvalidDimensions(format!(
                "zero extent {}x{}",
                self.width, self.height
            )));
        }
        if self.format.is_subsampled() && (self.width % 2 != 0 || self.height % 2 != 0) {
            return Err(AllocError::InvalidDimensions(format!(
                "{} requires even dimensions, got {}x{}",
                self.format, self.width, self.height
            )));
        }
        let min = self.format.min_stride(self.width);
        if self.stride < min {
            return Err(AllocError::InvalidDimensions(format!(
                "stride {} below minimum {} for {} at width {}",
                self.stride, min, self.format, self.width
            )));
        }
        Ok(())
    }
}

/// Frozen metadata of an allocated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub usage: ImageUsage,
    pub size_bytes: usize,
}

impl ImageInfo {
    pub fn from_desc(desc: &ImageDesc) -> Self {
        Self {
            format: desc.format,
            width: desc.width,
            height: desc.height,
            stride: desc.stride,
            usage: desc.usage,
            size_bytes: desc.size_bytes(),
        }
    }
}
