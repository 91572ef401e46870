// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for image allocation.

use crate::format::{ImageUsage, PixelFormat};

/// Errors that can occur while allocating or freeing device images.
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    /// The device cannot satisfy the allocation within its memory budget.
    #[error("out of device memory: requested {requested_bytes} bytes, {available_bytes} available")]
    OutOfDeviceMemory {
        requested_bytes: usize,
        available_bytes: usize,
    },

    /// The device does not support the requested pixel format.
    #[error("pixel format {0} is not supported by the device")]
    UnsupportedFormat(PixelFormat),

    /// The device does not support the requested usage combination.
    #[error("usage combination {0} is not supported by the device")]
    UnsupportedUsage(ImageUsage),

    /// The requested image size exceeds the device limits.
    #[error("image size {width}x{height} exceeds device limit {max_width}x{max_height}")]
    SizeExceedsLimit {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    /// The image description is internally inconsistent.
    #[error("invalid image dimensions: {0}")]
    InvalidDimensions(String),

    /// The underlying device handle became unusable.
    #[error("device lost")]
    DeviceLost,
}
