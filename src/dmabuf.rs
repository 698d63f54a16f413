// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Surfaces exported as DMA-BUF file descriptors.
//!
//! Each [`DmaBufMemory`] owns a fresh surface bound to its metadata and a
//! duplicate of the exported descriptor, which a consumer can close without
//! affecting the export handle or any other memory.
//!
//! # Example
//!
//! ```no_run
//! use edgefirst_video_memory::{
//!     provider::cpu::CpuProvider, DmaBufAllocator, PixelFormat, SurfaceAllocFlags, VideoInfo,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = Arc::new(CpuProvider::default());
//! let info = VideoInfo::new(PixelFormat::Nv12, 1920, 1080);
//! let allocator = DmaBufAllocator::new(provider, &info, SurfaceAllocFlags::empty())?;
//! let memory = allocator.alloc()?;
//! println!("exported {memory}");
//! # Ok(())
//! # }
//! ```

use crate::{
    error::{Error, ExportStage, Result},
    format::VideoInfo,
    meta::VideoMeta,
    provider::{BufferProxy, SurfaceAllocFlags, SurfaceProvider},
    proxy::SurfaceProxy,
    strategy::measure_surface,
};
use dma_buf::DmaBuf;
use libc::dup;
use std::{
    fmt, io,
    os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
    sync::Arc,
};
use tracing::{debug, error};

fn dup_fd(fd: RawFd) -> io::Result<OwnedFd> {
    let fd = unsafe { dup(fd) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Allocator of surfaces exported as file descriptors.
pub struct DmaBufAllocator<P: SurfaceProvider> {
    provider: Arc<P>,
    info: VideoInfo,
    flags: SurfaceAllocFlags,
}

impl<P: SurfaceProvider> DmaBufAllocator<P> {
    /// Measure the real layout of `info` surfaces on a probe surface.
    pub fn new(provider: Arc<P>, info: &VideoInfo, flags: SurfaceAllocFlags) -> Result<Self> {
        let surface = provider
            .create_surface_full(info, flags)
            .map_err(|err| Error::ProbeFailed(format!("probe surface for {info}: {err}")))?;
        let mut measured = info.with_format(info.format());
        if !measure_surface(provider.as_ref(), &surface, &mut measured)? {
            return Err(Error::ProbeFailed(format!(
                "probe image of {info} has an unusable layout"
            )));
        }
        drop(surface);

        debug!("dmabuf allocator {measured}");
        Ok(Self {
            provider,
            info: measured,
            flags,
        })
    }

    /// Measured descriptor of exported surfaces.
    pub fn video_info(&self) -> &VideoInfo {
        &self.info
    }

    pub fn flags(&self) -> SurfaceAllocFlags {
        self.flags
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn alloc(&self) -> Result<DmaBufMemory<P::Surface>> {
        self.alloc_with_meta(Arc::new(VideoMeta::new()))
    }

    /// Export a fresh surface and bind it to `meta`.
    pub fn alloc_with_meta(
        &self,
        meta: Arc<VideoMeta<P::Surface>>,
    ) -> Result<DmaBufMemory<P::Surface>> {
        let surface = self
            .provider
            .create_surface_full(&self.info, self.flags)
            .map_err(|err| {
                error!("failed to create surface for export: {err}");
                Error::export(ExportStage::CreateSurface, err)
            })?;
        let proxy = SurfaceProxy::new(surface);

        let buffer_proxy = self
            .provider
            .export_dma_buf(proxy.surface())
            .map_err(|err| {
                error!("failed to export surface {}: {err}", proxy.surface_id());
                Error::export(ExportStage::Export, err)
            })?;

        meta.set_surface_proxy(Some(proxy));

        let fd = dup_fd(buffer_proxy.raw_handle()).map_err(|err| {
            error!("failed to duplicate handle {}: {err}", buffer_proxy.raw_handle());
            Error::export(ExportStage::Duplicate, err)
        })?;

        debug!(
            "exported fd:{} handle:{} size:{}",
            fd.as_raw_fd(),
            buffer_proxy.raw_handle(),
            buffer_proxy.size()
        );
        Ok(DmaBufMemory {
            size: buffer_proxy.size(),
            fd,
            buffer_proxy,
            meta,
        })
    }
}

impl<P: SurfaceProvider> fmt::Debug for DmaBufAllocator<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DmaBufAllocator")
            .field("info", &self.info)
            .field("flags", &self.flags)
            .finish()
    }
}

/// File-descriptor memory of an exported surface.
pub struct DmaBufMemory<S> {
    fd: OwnedFd,
    size: usize,
    buffer_proxy: BufferProxy,
    meta: Arc<VideoMeta<S>>,
}

impl<S> DmaBufMemory<S> {
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// A DMA-BUF over a further duplicate of the descriptor.
    pub fn dmabuf(&self) -> Result<DmaBuf> {
        let fd = dup_fd(self.fd.as_raw_fd())?;
        Ok(DmaBuf::from(fd))
    }

    /// Export handle the descriptor was duplicated from.
    pub fn buffer_proxy(&self) -> &BufferProxy {
        &self.buffer_proxy
    }

    pub fn meta(&self) -> &Arc<VideoMeta<S>> {
        &self.meta
    }

    /// Take ownership of the descriptor; the surface stays bound to the
    /// metadata.
    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }
}

impl<S> fmt::Display for DmaBufMemory<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "fd:{} size:{} handle:{}",
            self.fd.as_raw_fd(),
            self.size,
            self.buffer_proxy.raw_handle()
        )
    }
}

impl<S> fmt::Debug for DmaBufMemory<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DmaBufMemory")
            .field("fd", &self.fd.as_raw_fd())
            .field("size", &self.size)
            .field("buffer_proxy", &self.buffer_proxy)
            .finish()
    }
}
