// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Surface provider capability interface.
//!
//! A [`SurfaceProvider`] is the accelerator connection: it allocates
//! surfaces, derives or creates CPU-mappable images, moves pixels between
//! the two and exports surfaces as file descriptors. Everything above this
//! trait (pools, strategy selection, video memory) is provider agnostic.

pub mod cpu;

use crate::{
    error::Result,
    format::{ChromaType, ImageLayout, PixelFormat, VideoInfo},
};
use bitflags::bitflags;
use std::{
    fmt,
    os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
    ptr::NonNull,
};

/// Identifier of a surface or image, unique per provider.
pub type ObjectId = u32;

bitflags! {
    /// Surface allocation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SurfaceAllocFlags: u32 {
        /// Allocate linear (untiled) storage.
        const LINEAR_STORAGE = 1 << 0;
        /// Honour the plane strides of the requested descriptor.
        const FIXED_STRIDES = 1 << 1;
        /// Honour the plane offsets of the requested descriptor.
        const FIXED_OFFSETS = 1 << 2;
    }
}

/// Accelerator-resident surface handle.
pub trait SurfaceObject: Send + Sync + 'static {
    fn id(&self) -> ObjectId;
    fn format(&self) -> PixelFormat;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

/// CPU-mappable image handle.
pub trait ImageObject: Send + 'static {
    fn id(&self) -> ObjectId;

    /// Plane layout of the image data.
    fn layout(&self) -> &ImageLayout;

    fn format(&self) -> PixelFormat {
        self.layout().format
    }
}

/// Exported file-descriptor handle of a surface.
///
/// Owns the exported descriptor; consumers that need their own copy must
/// duplicate it.
pub struct BufferProxy {
    fd: OwnedFd,
    size: usize,
}

impl BufferProxy {
    pub fn new(fd: OwnedFd, size: usize) -> Self {
        Self { fd, size }
    }

    pub fn handle(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    pub fn raw_handle(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Size in bytes of the exported buffer.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Debug for BufferProxy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferProxy")
            .field("fd", &self.fd.as_raw_fd())
            .field("size", &self.size)
            .finish()
    }
}

/// Capability interface of an accelerator connection.
///
/// Every operation may fail; failures are returned as typed errors and
/// never abort.
pub trait SurfaceProvider: Send + Sync + 'static {
    type Surface: SurfaceObject;
    type Image: ImageObject;

    /// Create a surface in exactly `format`.
    fn create_surface_with_format(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Self::Surface>;

    /// Create a surface in any native format of the chroma class.
    fn create_surface(&self, chroma: ChromaType, width: u32, height: u32) -> Result<Self::Surface>;

    /// Create a surface described by `info`, honouring `flags`.
    fn create_surface_full(&self, info: &VideoInfo, flags: SurfaceAllocFlags)
        -> Result<Self::Surface>;

    /// Create an independent image usable as a copy buffer.
    fn create_image(&self, format: PixelFormat, width: u32, height: u32) -> Result<Self::Image>;

    /// Derive an image aliasing the surface memory.
    fn derive_image(&self, surface: &Self::Surface) -> Result<Self::Image>;

    /// Map the image and return the base address of its data.
    ///
    /// Plane `n` starts at `layout().offsets[n]` from the returned pointer,
    /// which stays valid until [`SurfaceProvider::unmap_image`].
    fn map_image(&self, image: &mut Self::Image) -> Result<NonNull<u8>>;

    fn unmap_image(&self, image: &mut Self::Image) -> Result<()>;

    /// Copy the surface pixels into the image.
    fn get_image(&self, surface: &Self::Surface, image: &mut Self::Image) -> Result<()>;

    /// Copy the image pixels onto the surface.
    fn put_image(&self, surface: &Self::Surface, image: &Self::Image) -> Result<()>;

    /// Export the surface as a file-descriptor handle.
    fn export_dma_buf(&self, surface: &Self::Surface) -> Result<BufferProxy>;

    /// Best surface format to carry pixels of `format`.
    fn best_native_format(&self, format: PixelFormat) -> Option<PixelFormat> {
        match format.chroma_type() {
            None => Some(PixelFormat::Nv12),
            Some(ChromaType::Yuv420) => Some(PixelFormat::Nv12),
            Some(ChromaType::Yuv420_10) => Some(PixelFormat::P010),
            Some(ChromaType::Yuv422) => Some(PixelFormat::Yuy2),
            Some(ChromaType::Yuv400) => Some(PixelFormat::Gray8),
            Some(ChromaType::Rgb32) => Some(format),
        }
    }
}
