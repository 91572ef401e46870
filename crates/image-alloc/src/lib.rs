// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # image-alloc
//!
//! Device-backed image memory allocation for the vidpool frame pool.
//!
//! # Key Components
//!
//! - [`PixelFormat`] / [`ImageUsage`] / [`ImageDesc`] — the shape of an
//!   image allocation request: format, extent, row stride, usage flags.
//! - [`ImageDevice`] — the trait boundary to whatever owns the real
//!   GPU/display connection. The pool never bootstraps a device itself;
//!   it is handed a shared handle and fails with `DeviceLost` if that
//!   handle dies.
//! - [`SoftwareDevice`] — a budgeted in-process device used by tests and
//!   the demo CLI.
//! - [`ImageAllocator`] — capability-checked, atomic allocate/free of
//!   [`AllocatedImage`]s.
//!
//! # Ownership Model
//!
//! ```text
//! ImageAllocator::allocate(&desc)
//!       │
//!       ▼
//!   AllocatedImage   ◄── move-only: exactly one owner, ever
//!       │
//!       │  ImageAllocator::free()
//!       ▼
//!   DeviceImage destroyed, memory returned to the device
//! ```
//!
//! Allocation is atomic from the caller's point of view: description
//! validation and capability checks happen before the device is touched,
//! and a failed device call leaves nothing behind.

mod allocator;
mod device;
mod error;
mod format;

pub use allocator::{AllocatedImage, ImageAllocator};
pub use device::{DeviceCaps, DeviceImage, ImageDevice, SoftwareDevice};
pub use error::AllocError;
pub use format::{ImageDesc, ImageInfo, ImageUsage, PixelFormat};
