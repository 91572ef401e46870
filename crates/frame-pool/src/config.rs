// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pool configuration and negotiation.
//!
//! A [`PoolConfig`] is proposed by the caller, negotiated against the
//! device (which may adjust the stride), and frozen on activation. The
//! negotiated config is the contract: producers and consumers must use
//! the returned values, not the requested ones.
//!
//! # TOML Format
//! ```toml
//! format = "nv12"
//! width = 1920
//! height = 1080
//! min_buffers = 2
//! max_buffers = 8
//!
//! [usage]
//! sampled = true
//! transfer_dst = true
//! ```

use crate::PoolError;
use image_alloc::{ImageAllocator, ImageDesc, ImageUsage, PixelFormat};
use std::path::Path;

/// Configuration of a frame pool. Immutable once the pool activates.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolConfig {
    /// Pixel format of every buffer in the pool.
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Plane-0 row stride in bytes. `0` means "derive from format and
    /// device alignment"; negotiation always fills it in.
    #[serde(default)]
    pub stride: u32,
    /// Buffers pre-allocated on activation.
    pub min_buffers: u32,
    /// Hard ceiling on allocated buffers. `0` means unbounded.
    pub max_buffers: u32,
    /// Memory-usage flags for every buffer.
    #[serde(default = "default_usage")]
    pub usage: ImageUsage,
}

fn default_usage() -> ImageUsage {
    ImageUsage::decode_target()
}

impl PoolConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, PoolError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PoolError::ConfigInvalid(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, PoolError> {
        toml::from_str(toml_str)
            .map_err(|e| PoolError::ConfigInvalid(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, PoolError> {
        toml::to_string_pretty(self)
            .map_err(|e| PoolError::ConfigInvalid(format!("TOML serialise error: {e}")))
    }

    /// Checks internal consistency, independent of any device.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.width == 0 || self.height == 0 {
            return Err(PoolError::ConfigInvalid(format!(
                "zero extent {}x{}",
                self.width, self.height
            )));
        }
        if self.max_buffers > 0 && self.min_buffers > self.max_buffers {
            return Err(PoolError::ConfigInvalid(format!(
                "min_buffers ({}) exceeds max_buffers ({})",
                self.min_buffers, self.max_buffers
            )));
        }
        if self.usage.is_empty() {
            return Err(PoolError::ConfigInvalid(
                "usage flags are empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The per-buffer image description this config implies.
    pub fn image_desc(&self) -> ImageDesc {
        ImageDesc {
            format: self.format,
            width: self.width,
            height: self.height,
            stride: self.stride,
            usage: self.usage,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            format: PixelFormat::Rgba8,
            width: 1920,
            height: 1080,
            stride: 0,
            min_buffers: 2,
            max_buffers: 8,
            usage: ImageUsage::decode_target(),
        }
    }
}

/// Validates `requested` against the device and freezes a usable config.
///
/// The returned config may differ from the request: the stride is raised
/// to the format minimum and rounded up to the device row alignment.
/// Callers must use the returned config.
pub(crate) fn negotiate(
    allocator: &ImageAllocator,
    requested: &PoolConfig,
) -> Result<PoolConfig, PoolError> {
    requested.validate()?;

    let caps = allocator.caps();
    if !caps.supports_format(requested.format) {
        return Err(PoolError::ConfigInvalid(format!(
            "format {} not supported by device",
            requested.format
        )));
    }
    if !caps.supports_usage(&requested.usage) {
        return Err(PoolError::ConfigInvalid(format!(
            "usage {} not supported by device",
            requested.usage
        )));
    }
    if requested.width > caps.max_width || requested.height > caps.max_height {
        return Err(PoolError::ConfigInvalid(format!(
            "size {}x{} exceeds device limit {}x{}",
            requested.width, requested.height, caps.max_width, caps.max_height
        )));
    }
    if requested.format.is_subsampled()
        && (requested.width % 2 != 0 || requested.height % 2 != 0)
    {
        return Err(PoolError::ConfigInvalid(format!(
            "{} requires even dimensions, got {}x{}",
            requested.format, requested.width, requested.height
        )));
    }

    let min_stride = requested.format.min_stride(requested.width);
    let stride = align_up(requested.stride.max(min_stride), caps.row_alignment);

    let mut negotiated = requested.clone();
    if stride != requested.stride {
        tracing::debug!(
            requested = requested.stride,
            negotiated = stride,
            "stride adjusted during negotiation"
        );
    }
    negotiated.stride = stride;
    Ok(negotiated)
}

fn align_up(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image_alloc::SoftwareDevice;
    use std::sync::Arc;

    fn allocator() -> ImageAllocator {
        ImageAllocator::new(Arc::new(SoftwareDevice::new()))
    }

    #[test]
    fn test_default_validates() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn test_min_over_max_rejected() {
        let c = PoolConfig {
            min_buffers: 9,
            max_buffers: 4,
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(PoolError::ConfigInvalid(_))));
    }

    #[test]
    fn test_unbounded_max_allows_any_min() {
        let c = PoolConfig {
            min_buffers: 64,
            max_buffers: 0,
            ..Default::default()
        };
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_negotiate_fills_stride() {
        let c = PoolConfig {
            width: 100,
            height: 100,
            stride: 0,
            ..Default::default()
        };
        let negotiated = negotiate(&allocator(), &c).unwrap();
        // 100 px * 4 Bpp = 400, rounded up to the 256-byte alignment.
        assert_eq!(negotiated.stride, 512);
        // Everything else is untouched.
        assert_eq!(negotiated.width, 100);
        assert_eq!(negotiated.max_buffers, c.max_buffers);
    }

    #[test]
    fn test_negotiate_keeps_aligned_stride() {
        let c = PoolConfig {
            width: 64,
            ..Default::default()
        };
        let negotiated = negotiate(&allocator(), &c).unwrap();
        assert_eq!(negotiated.stride, 256);
    }

    #[test]
    fn test_negotiate_rejects_oversize() {
        let c = PoolConfig {
            width: 20000,
            ..Default::default()
        };
        assert!(matches!(
            negotiate(&allocator(), &c),
            Err(PoolError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_negotiate_rejects_odd_subsampled() {
        let c = PoolConfig {
            format: PixelFormat::Nv12,
            width: 127,
            height: 72,
            ..Default::default()
        };
        assert!(matches!(
            negotiate(&allocator(), &c),
            Err(PoolError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_toml_roundtrip() {
        let c = PoolConfig::default();
        let toml = c.to_toml().unwrap();
        let back = PoolConfig::from_toml(&toml).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_from_toml_minimal() {
        let toml = r#"
format = "nv12"
width = 1280
height = 720
min_buffers = 3
max_buffers = 6
"#;
        let c = PoolConfig::from_toml(toml).unwrap();
        assert_eq!(c.format, PixelFormat::Nv12);
        assert_eq!(c.stride, 0);
        assert_eq!(c.usage, ImageUsage::decode_target());
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
    }
}
